//! Job envelope as delivered by the work queue.
//!
//! The envelope is parsed eagerly; the kind-specific payload is kept as raw
//! JSON and decoded by [`Job::operation`], so a malformed payload still leaves
//! a transaction id to report the failure against.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cid::encode_content_id;
use crate::encoding::{Felt, Uint256};
use crate::error::{Error, Result};
use crate::account::{mint_calls, set_token_uri_calls};
use crate::transaction::{Call, CallBatch};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    #[serde(rename = "CREATE_STARKNET_PROJECT")]
    CreateProject,
    #[serde(rename = "CREATE_STARKNET_NFT")]
    MintBatch,
    #[serde(rename = "TRANSFER_STARKNET_NFT")]
    Transfer,
    #[serde(rename = "BURN_STARKNET_NFT")]
    Burn,
    #[serde(rename = "WITHDRAW_STARKNET_NFT")]
    Withdraw,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CreateProject => "CREATE_STARKNET_PROJECT",
            JobKind::MintBatch => "CREATE_STARKNET_NFT",
            JobKind::Transfer => "TRANSFER_STARKNET_NFT",
            JobKind::Burn => "BURN_STARKNET_NFT",
            JobKind::Withdraw => "WITHDRAW_STARKNET_NFT",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key carried in a payload. Never printed.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        SecretString(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default = "new_job_id")]
    pub id: String,
    #[serde(default, alias = "jobGroupId", skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    pub transaction_id: String,
    pub kind: JobKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectPayload {
    #[serde(alias = "id")]
    pub project_id: String,
}

/// Batch description expanded into mint calls followed by setTokenURI calls.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MintBatchSpec {
    pub token_id_start: Uint256,
    pub count: u64,
    pub recipient: Felt,
    #[serde(default)]
    pub content_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MintBatchPayload {
    pub master_address: Felt,
    pub master_private_key: SecretString,
    pub contract_address: Felt,
    /// Off-chain metadata reference recorded on success.
    #[serde(default, alias = "ipfsUrl")]
    pub metadata_id: Option<String>,
    #[serde(default)]
    pub calls: Vec<Call>,
    #[serde(default)]
    pub batch: Option<MintBatchSpec>,
}

impl MintBatchPayload {
    /// The calls this job executes, in order.
    pub fn call_batch(&self) -> Result<CallBatch> {
        match (&self.batch, self.calls.is_empty()) {
            (Some(_), false) => Err(Error::InvalidJob("payload carries both calls and a batch description".to_string())),
            (None, true) => Err(Error::InvalidJob("payload carries neither calls nor a batch description".to_string())),
            (None, false) => Ok(CallBatch::from(self.calls.clone())),
            (Some(spec), true) => {
                let mut calls = mint_calls(&self.contract_address, &spec.recipient, spec.token_id_start, spec.count)?;
                if let Some(cid) = &spec.content_id {
                    let content_hash = encode_content_id(cid)?;
                    calls.extend(set_token_uri_calls(
                        &self.contract_address,
                        spec.token_id_start,
                        spec.count,
                        content_hash,
                    )?);
                }
                Ok(calls)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub nft_id: String,
    pub from: Felt,
    pub owner_private_key: SecretString,
    pub to: Felt,
    pub contract_address: Felt,
    pub token_id: Uint256,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BurnPayload {
    pub nft_id: String,
    pub owner_address: Felt,
    pub owner_private_key: SecretString,
    pub contract_address: Felt,
    pub token_id: Uint256,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawPayload {
    pub nft_id: String,
    pub owner_address: Felt,
    pub owner_private_key: SecretString,
    pub contract_address: Felt,
    pub token_id: Uint256,
    pub l1_recipient: Felt,
    #[serde(default)]
    pub bridge_address: Option<Felt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    CreateProject(CreateProjectPayload),
    MintBatch(MintBatchPayload),
    Transfer(TransferPayload),
    Burn(BurnPayload),
    Withdraw(WithdrawPayload),
}

impl Operation {
    /// Address whose nonce the operation consumes.
    pub fn signer_address(&self) -> Option<&Felt> {
        match self {
            Operation::CreateProject(_) => None,
            Operation::MintBatch(p) => Some(&p.master_address),
            Operation::Transfer(p) => Some(&p.from),
            Operation::Burn(p) => Some(&p.owner_address),
            Operation::Withdraw(p) => Some(&p.owner_address),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: JobKind, payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone()).map_err(|e| Error::InvalidJob(format!("{} payload: {}", kind, e)))
}

impl Job {
    pub fn new(transaction_id: impl Into<String>, kind: JobKind, payload: serde_json::Value) -> Self {
        Job {
            id: new_job_id(),
            group_key: None,
            transaction_id: transaction_id.into(),
            kind,
            payload,
        }
    }

    pub fn operation(&self) -> Result<Operation> {
        Ok(match self.kind {
            JobKind::CreateProject => Operation::CreateProject(decode(self.kind, &self.payload)?),
            JobKind::MintBatch => Operation::MintBatch(decode(self.kind, &self.payload)?),
            JobKind::Transfer => Operation::Transfer(decode(self.kind, &self.payload)?),
            JobKind::Burn => Operation::Burn(decode(self.kind, &self.payload)?),
            JobKind::Withdraw => Operation::Withdraw(decode(self.kind, &self.payload)?),
        })
    }

    /// Serialization key: explicit group key, else the signing account, else
    /// the project id. Jobs that cannot be decoded fall back to their own id.
    pub fn group_key(&self) -> String {
        if let Some(key) = &self.group_key {
            return key.clone();
        }
        match self.operation() {
            Ok(Operation::CreateProject(p)) => format!("project:{}", p.project_id),
            Ok(op) => match op.signer_address() {
                Some(address) => format!("account:{}", address),
                None => format!("job:{}", self.id),
            },
            Err(_) => format!("job:{}", self.id),
        }
    }
}
