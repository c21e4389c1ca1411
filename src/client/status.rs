// Status-record service: the system of record for projects, NFTs and transactions
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::client::rpc_client::{RpcCallError, RpcClient};
use crate::rpc::types::{NftUpdate, PingParams, PingResponse, ProjectUpdate, TransactionUpdate, UpdateByIdParams};

/// Remote status service. Every update is an idempotent upsert on the far side.
#[async_trait]
pub trait StatusService: Send + Sync {
    async fn update_project_by_id(&self, id: &str, update: &ProjectUpdate) -> Result<(), RpcCallError>;
    async fn update_transaction_by_id(&self, id: &str, update: &TransactionUpdate) -> Result<(), RpcCallError>;
    async fn update_nft_by_id(&self, id: &str, update: &NftUpdate) -> Result<(), RpcCallError>;
    async fn update_nft_by_transaction_id(&self, id: &str, update: &NftUpdate) -> Result<(), RpcCallError>;
    async fn ping(&self, input: &str) -> Result<String, RpcCallError>;
}

pub struct JsonRpcStatusService {
    client: RpcClient,
}

impl JsonRpcStatusService {
    pub fn new(url: String, timeout: Duration) -> Result<Self, RpcCallError> {
        Ok(Self { client: RpcClient::new(url, timeout)? })
    }

    async fn update<T: Serialize + Clone + Send + Sync>(&self, method: &str, id: &str, update: &T) -> Result<(), RpcCallError> {
        let params = UpdateByIdParams { id: id.to_string(), update: update.clone() };
        // acknowledgement body is ignored
        let _: serde_json::Value = self.client.send_request(method, params).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusService for JsonRpcStatusService {
    async fn update_project_by_id(&self, id: &str, update: &ProjectUpdate) -> Result<(), RpcCallError> {
        self.update("updateProjectById", id, update).await
    }

    async fn update_transaction_by_id(&self, id: &str, update: &TransactionUpdate) -> Result<(), RpcCallError> {
        self.update("updateTransactionById", id, update).await
    }

    async fn update_nft_by_id(&self, id: &str, update: &NftUpdate) -> Result<(), RpcCallError> {
        self.update("updateNftById", id, update).await
    }

    async fn update_nft_by_transaction_id(&self, id: &str, update: &NftUpdate) -> Result<(), RpcCallError> {
        self.update("updateNftByTransactionId", id, update).await
    }

    async fn ping(&self, input: &str) -> Result<String, RpcCallError> {
        let response: PingResponse = self
            .client
            .send_request("ping", PingParams { input: input.to_string() })
            .await?;
        Ok(response.output)
    }
}
