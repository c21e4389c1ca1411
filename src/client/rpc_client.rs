// RPC client for making JSON-RPC requests
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::rpc::types::{RpcError, RpcRequest, RpcResponse};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcCallError {
    /// Request never produced a usable response.
    #[error("RPC request failed: {0}")]
    Transport(String),
    /// Remote side answered with a JSON-RPC error object.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Remote(RpcError),
    /// Response arrived but did not have the expected shape.
    #[error("Failed to parse response: {0}")]
    Decode(String),
}

pub struct RpcClient {
    url: String,
    client: Client,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, RpcCallError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcCallError::Transport(format!("client setup: {}", e)))?;
        Ok(Self {
            url,
            client,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send_request<P, R>(&self, method: &str, params: P) -> Result<R, RpcCallError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcCallError::Transport(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(RpcCallError::Transport(format!("HTTP {}", response.status())));
        }

        let body: RpcResponse = response.json().await
            .map_err(|e| RpcCallError::Decode(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcCallError::Remote(error));
        }

        let result = body.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| RpcCallError::Decode(format!("{}: {}", method, e)))
    }
}
