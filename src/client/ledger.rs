//! Ledger gateway: the boundary between the worker and the chain node.
//!
//! The worker only needs six things from the ledger: read a nonce, submit an
//! invoke, deploy a contract, learn whether a transaction is final, and make a
//! read-only call. [`JsonRpcLedger`] speaks the node's JSON-RPC dialect; tests
//! substitute scripted gateways.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::client::rpc_client::{RpcCallError, RpcClient};
use crate::encoding::Felt;
use crate::error::{Error, Result};
use crate::transaction::{selector_from_name, Transaction};

const INVALID_TRANSACTION_NONCE: i64 = 52;
const TRANSACTION_HASH_NOT_FOUND: [i64; 2] = [25, 29];

/// Opaque handle of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: Felt,
}

impl TxHandle {
    pub fn new(hash: Felt) -> Self {
        TxHandle { hash }
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finality {
    Finalized,
    Rejected { reason: String },
    TimedOut,
}

/// One observation of a transaction's lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Accepted,
    Rejected { reason: String },
}

#[derive(Clone, Debug)]
pub struct DeployRequest {
    /// Compiled contract class as produced by the contract toolchain.
    pub contract_class: serde_json::Value,
    pub constructor_calldata: Vec<Felt>,
    pub salt: Option<Felt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Felt,
    pub handle: TxHandle,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn get_nonce(&self, address: &Felt) -> Result<Felt>;

    /// `StaleNonce` when the node refuses the nonce the transaction was built with.
    async fn submit(&self, tx: &Transaction) -> Result<TxHandle>;

    async fn deploy(&self, request: &DeployRequest) -> Result<DeployedContract>;

    async fn transaction_status(&self, handle: &TxHandle) -> Result<TxStatus>;

    async fn await_finality(&self, handle: &TxHandle, timeout: Duration) -> Result<Finality>;

    async fn call(&self, contract: &Felt, entrypoint: &str, calldata: &[Felt]) -> Result<Vec<Felt>>;
}

#[derive(Deserialize, Debug)]
struct SubmitResult {
    transaction_hash: Felt,
}

#[derive(Deserialize, Debug)]
struct DeployResult {
    transaction_hash: Felt,
    contract_address: Felt,
}

#[derive(Deserialize, Debug, Default)]
struct ReceiptResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    finality_status: Option<String>,
    #[serde(default)]
    execution_status: Option<String>,
    #[serde(default)]
    status_data: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
}

impl ReceiptResult {
    fn into_status(self) -> TxStatus {
        if self.execution_status.as_deref() == Some("REVERTED") {
            return TxStatus::Rejected {
                reason: self.revert_reason.unwrap_or_else(|| "REVERTED".to_string()),
            };
        }
        let status = self.finality_status.or(self.status).unwrap_or_default();
        match status.as_str() {
            "ACCEPTED_ON_L2" | "ACCEPTED_ON_L1" => TxStatus::Accepted,
            "REJECTED" => TxStatus::Rejected {
                reason: self.status_data.unwrap_or_else(|| "REJECTED".to_string()),
            },
            _ => TxStatus::Pending,
        }
    }
}

/// JSON-RPC ledger gateway.
pub struct JsonRpcLedger {
    client: RpcClient,
    poll_interval: Duration,
}

impl JsonRpcLedger {
    pub fn new(url: String, request_timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let client = RpcClient::new(url, request_timeout).map_err(transport)?;
        Ok(Self { client, poll_interval })
    }
}

fn transport(err: RpcCallError) -> Error {
    Error::LedgerTransport(err.to_string())
}

fn is_nonce_error(err: &RpcCallError) -> bool {
    match err {
        RpcCallError::Remote(remote) => {
            remote.code == INVALID_TRANSACTION_NONCE || remote.message.to_lowercase().contains("nonce")
        }
        _ => false,
    }
}

#[async_trait]
impl LedgerGateway for JsonRpcLedger {
    async fn get_nonce(&self, address: &Felt) -> Result<Felt> {
        self.client
            .send_request("starknet_getNonce", json!({ "block_id": "pending", "contract_address": address }))
            .await
            .map_err(transport)
    }

    async fn submit(&self, tx: &Transaction) -> Result<TxHandle> {
        let params = json!({
            "invoke_transaction": {
                "type": "INVOKE",
                "sender_address": tx.sender_address(),
                "calldata": tx.calldata(),
                "signature": tx.signature(),
                "max_fee": tx.max_fee(),
                "version": tx.version(),
                "nonce": tx.nonce(),
            }
        });
        match self.client.send_request::<_, SubmitResult>("starknet_addInvokeTransaction", params).await {
            Ok(result) => {
                if &result.transaction_hash != tx.hash() {
                    warn!(local = %tx.hash(), remote = %result.transaction_hash, "node computed a different transaction hash; check chain id and version");
                }
                Ok(TxHandle::new(result.transaction_hash))
            }
            Err(e) if is_nonce_error(&e) => Err(Error::StaleNonce(format!("nonce {} for {}: {}", tx.nonce(), tx.sender_address(), e))),
            Err(RpcCallError::Remote(remote)) => Err(Error::LedgerRejected {
                tx_hash: tx.hash().to_hex(),
                reason: remote.message,
            }),
            Err(e) => Err(transport(e)),
        }
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<DeployedContract> {
        let params = json!({
            "deploy_transaction": {
                "contract_address_salt": request.salt.clone().unwrap_or_default(),
                "constructor_calldata": request.constructor_calldata,
                "contract_class": request.contract_class,
            }
        });
        match self.client.send_request::<_, DeployResult>("starknet_addDeployTransaction", params).await {
            Ok(result) => Ok(DeployedContract {
                address: result.contract_address,
                handle: TxHandle::new(result.transaction_hash),
            }),
            Err(RpcCallError::Remote(remote)) => Err(Error::LedgerRejected {
                tx_hash: "<deploy>".to_string(),
                reason: remote.message,
            }),
            Err(e) => Err(transport(e)),
        }
    }

    async fn transaction_status(&self, handle: &TxHandle) -> Result<TxStatus> {
        let params = json!({ "transaction_hash": handle.hash });
        match self.client.send_request::<_, ReceiptResult>("starknet_getTransactionReceipt", params).await {
            Ok(receipt) => Ok(receipt.into_status()),
            // not yet visible to the node we asked
            Err(RpcCallError::Remote(remote)) if TRANSACTION_HASH_NOT_FOUND.contains(&remote.code) => Ok(TxStatus::Pending),
            Err(e) => Err(transport(e)),
        }
    }

    async fn await_finality(&self, handle: &TxHandle, timeout: Duration) -> Result<Finality> {
        let poll = async {
            loop {
                match self.transaction_status(handle).await {
                    Ok(TxStatus::Accepted) => return Finality::Finalized,
                    Ok(TxStatus::Rejected { reason }) => return Finality::Rejected { reason },
                    Ok(TxStatus::Pending) => {}
                    // the transaction is already out; a flaky poll must not end the wait
                    Err(e) => warn!(tx_hash = %handle, error = %e, "finality poll failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(finality) => Ok(finality),
            Err(_) => Ok(Finality::TimedOut),
        }
    }

    async fn call(&self, contract: &Felt, entrypoint: &str, calldata: &[Felt]) -> Result<Vec<Felt>> {
        let params = json!({
            "request": {
                "contract_address": contract,
                "entry_point_selector": selector_from_name(entrypoint),
                "calldata": calldata,
            },
            "block_id": "latest",
        });
        self.client.send_request("starknet_call", params).await.map_err(transport)
    }
}
