// RPC types for JSON-RPC 2.0 protocol and the status-record payloads
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Serialize, Debug)]
pub struct RpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: P,
    pub id: u64,
}

#[derive(Deserialize, Debug)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    CreatingErc721Contract,
    Success,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Success,
    Failed,
    TransferSuccess,
    TransferFailed,
    BurnSuccess,
    BurnFailed,
    WithdrawSuccess,
    WithdrawFailed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_mnemonic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract721_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

impl ProjectUpdate {
    pub fn status(status: ProjectStatus) -> Self {
        ProjectUpdate { status: Some(status), ..Default::default() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NftUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TokenStatus>,
}

impl NftUpdate {
    pub fn status(status: TokenStatus) -> Self {
        NftUpdate { status: Some(status), ..Default::default() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Absent: leave as is. `null`: clear. A string: set.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub error: Option<Option<String>>,
}

/// Tells an explicit `null` apart from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TransactionUpdate {
    /// SUCCESS also clears any error left by an earlier FAILED write.
    pub fn success(tx_hash: Option<String>) -> Self {
        TransactionUpdate { status: Some(TransactionStatus::Success), tx_hash, error: Some(None) }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TransactionUpdate { status: Some(TransactionStatus::Failed), tx_hash: None, error: Some(Some(error.into())) }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.as_deref())
    }
}

/// `{ id, update }` body shared by every update method.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateByIdParams<T> {
    pub id: String,
    pub update: T,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingParams {
    pub input: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingResponse {
    pub output: String,
}
