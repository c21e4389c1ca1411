//! Account type definitions

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ledger::TxHandle;
use crate::crypto::Signer;
use crate::encoding::{Felt, Uint256};

/// Ledger account: an address plus the capability to sign for it.
#[derive(Clone)]
pub struct Account {
    address: Felt,
    signer: Arc<dyn Signer>,
}

impl Account {
    pub fn new(address: Felt, signer: Arc<dyn Signer>) -> Self {
        Account { address, signer }
    }

    pub fn address(&self) -> &Felt {
        &self.address
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Result of the create-account operation. The private key is only ever
/// handed to the status service.
pub struct CreatedAccount {
    pub account: Account,
    pub private_key: String,
}

impl fmt::Debug for CreatedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedAccount")
            .field("account", &self.account)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Submitted but not yet final.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub handle: TxHandle,
    /// Set for deployments.
    pub address: Option<Felt>,
}

/// Token URI as stored by the ERC721 contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenUri {
    pub value: Uint256,
}

impl TokenUri {
    /// Bare lowercase hex, no prefix.
    pub fn content_hash_hex(&self) -> String {
        format!("{:x}", self.value.to_biguint())
    }
}

/// Compiled classes and token parameters used by deployments.
#[derive(Clone, Debug)]
pub struct ContractArtifacts {
    pub account_class: serde_json::Value,
    pub erc721_class: serde_json::Value,
    pub token_name: String,
    pub token_symbol: String,
    /// L1 bridge contract used by `withdraw` when the job names none.
    pub bridge_address: Felt,
}

#[derive(Clone, Debug)]
pub struct OperationSettings {
    pub finality_timeout: Duration,
    /// Re-reads of the nonce after the ledger refuses it.
    pub nonce_attempts: u32,
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings {
            finality_timeout: Duration::from_secs(300),
            nonce_attempts: 3,
        }
    }
}
