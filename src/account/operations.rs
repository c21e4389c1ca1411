//! Account operation library.
//!
//! Pure call constructors at the top, the I/O-performing operations on
//! [`AccountOperations`] below. Every operation is split into a `submit_*`
//! half that returns a [`PendingTx`] and [`AccountOperations::confirm`], so
//! callers that need the hash before finality can have it.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::account::types::{Account, ContractArtifacts, CreatedAccount, OperationSettings, PendingTx, TokenUri};
use crate::client::ledger::{DeployRequest, DeployedContract, Finality, LedgerGateway, TxHandle};
use crate::crypto::KeyPair;
use crate::encoding::{Felt, Uint256};
use crate::error::{Error, Result};
use crate::transaction::{sign, Call, CallBatch, TransactionBuilder};

pub const MINT_ENTRYPOINT: &str = "mint";
pub const SET_TOKEN_URI_ENTRYPOINT: &str = "setTokenURI";
pub const TRANSFER_FROM_ENTRYPOINT: &str = "transferFrom";
pub const BURN_ENTRYPOINT: &str = "burn";
pub const WITHDRAW_ENTRYPOINT: &str = "withdraw";
pub const TOKEN_URI_ENTRYPOINT: &str = "tokenURI";

/// `start, start + 1, ..., start + count - 1`
fn token_ids(start: Uint256, count: u64) -> Result<Vec<Uint256>> {
    if count == 0 {
        return Err(Error::InvalidArgument("batch count must be at least 1".to_string()));
    }
    (0..count)
        .map(|index| {
            start.checked_add(index as u128).ok_or_else(|| {
                Error::InvalidArgument(format!("token id {} + {} overflows 256 bits", start, index))
            })
        })
        .collect()
}

fn limbs(value: &Uint256) -> [Felt; 2] {
    value.to_felts()
}

pub fn mint_calls(contract: &Felt, recipient: &Felt, start: Uint256, count: u64) -> Result<CallBatch> {
    let calls = token_ids(start, count)?
        .iter()
        .map(|id| {
            let [low, high] = limbs(id);
            Call::new(contract.clone(), MINT_ENTRYPOINT, vec![recipient.clone(), low, high])
        })
        .collect::<Vec<_>>();
    Ok(calls.into())
}

pub fn set_token_uri_calls(contract: &Felt, start: Uint256, count: u64, content_hash: Uint256) -> Result<CallBatch> {
    let [hash_low, hash_high] = limbs(&content_hash);
    let calls = token_ids(start, count)?
        .iter()
        .map(|id| {
            let [low, high] = limbs(id);
            Call::new(
                contract.clone(),
                SET_TOKEN_URI_ENTRYPOINT,
                vec![low, high, hash_low.clone(), hash_high.clone()],
            )
        })
        .collect::<Vec<_>>();
    Ok(calls.into())
}

pub fn transfer_call(contract: &Felt, from: &Felt, to: &Felt, token_id: Uint256) -> Call {
    let [low, high] = limbs(&token_id);
    Call::new(contract.clone(), TRANSFER_FROM_ENTRYPOINT, vec![from.clone(), to.clone(), low, high])
}

pub fn burn_call(contract: &Felt, token_id: Uint256) -> Call {
    let [low, high] = limbs(&token_id);
    Call::new(contract.clone(), BURN_ENTRYPOINT, vec![low, high])
}

pub fn withdraw_call(contract: &Felt, l1_recipient: &Felt, token_id: Uint256, bridge: &Felt) -> Call {
    let [low, high] = limbs(&token_id);
    Call::new(
        contract.clone(),
        WITHDRAW_ENTRYPOINT,
        vec![l1_recipient.clone(), low, high, bridge.clone()],
    )
}

pub struct AccountOperations {
    gateway: Arc<dyn LedgerGateway>,
    builder: TransactionBuilder,
    contracts: ContractArtifacts,
    settings: OperationSettings,
}

impl AccountOperations {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        builder: TransactionBuilder,
        contracts: ContractArtifacts,
        settings: OperationSettings,
    ) -> Self {
        AccountOperations { gateway, builder, contracts, settings }
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    pub fn contracts(&self) -> &ContractArtifacts {
        &self.contracts
    }

    pub fn settings(&self) -> &OperationSettings {
        &self.settings
    }

    /// Build, sign and submit one multicall. The nonce is read right before
    /// building; a refused nonce triggers a fresh read and rebuild.
    #[instrument(skip(self, account, calls), fields(sender = %account.address(), calls = calls.len()))]
    pub async fn submit_calls(&self, account: &Account, calls: &CallBatch) -> Result<PendingTx> {
        if calls.is_empty() {
            return Err(Error::InvalidArgument("empty call batch".to_string()));
        }

        let mut refreshes = 0;
        loop {
            let nonce = self.gateway.get_nonce(account.address()).await?;
            let unsigned = self.builder.build(account.address(), calls, &nonce);
            let tx = sign(unsigned, account.signer())?;

            match self.gateway.submit(&tx).await {
                Ok(handle) => {
                    info!(tx_hash = %handle, nonce = %nonce, "transaction submitted");
                    return Ok(PendingTx { handle, address: None });
                }
                Err(Error::StaleNonce(reason)) if refreshes < self.settings.nonce_attempts => {
                    refreshes += 1;
                    warn!(nonce = %nonce, refresh = refreshes, reason = %reason, "nonce refused, rebuilding");
                }
                // the node may have accepted it before the connection dropped
                Err(Error::LedgerTransport(reason)) => {
                    warn!(tx_hash = %tx.hash(), reason = %reason, "submission outcome unknown");
                    return Err(Error::SubmissionUnknown { tx_hash: tx.hash().to_hex(), reason });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for finality within the configured budget.
    pub async fn confirm(&self, pending: &PendingTx) -> Result<TxHandle> {
        let timeout = self.settings.finality_timeout;
        debug!(tx_hash = %pending.handle, "awaiting finality");
        match self.gateway.await_finality(&pending.handle, timeout).await? {
            Finality::Finalized => {
                info!(tx_hash = %pending.handle, "transaction final");
                Ok(pending.handle.clone())
            }
            Finality::Rejected { reason } => Err(Error::LedgerRejected {
                tx_hash: pending.handle.to_string(),
                reason,
            }),
            Finality::TimedOut => Err(Error::FinalityTimeout {
                tx_hash: pending.handle.to_string(),
                waited_secs: timeout.as_secs(),
            }),
        }
    }

    pub async fn execute(&self, account: &Account, calls: &CallBatch) -> Result<TxHandle> {
        let pending = self.submit_calls(account, calls).await?;
        self.confirm(&pending).await
    }

    /// Deploy an account contract for a freshly generated key pair.
    #[instrument(skip(self))]
    pub async fn submit_create_account(&self) -> Result<(PendingTx, CreatedAccount)> {
        let keypair = KeyPair::generate();
        let public_key = keypair.public_key_felt();
        let pending = self
            .submit_deploy(self.contracts.account_class.clone(), vec![public_key.clone()], Some(public_key))
            .await?;
        let address = pending
            .address
            .clone()
            .ok_or_else(|| Error::LedgerTransport("deployment returned no address".to_string()))?;
        info!(address = %address, "account deployment submitted");

        let private_key = keypair.private_key_hex();
        let account = Account::new(address, Arc::new(keypair));
        Ok((pending, CreatedAccount { account, private_key }))
    }

    pub async fn create_account(&self) -> Result<CreatedAccount> {
        let (pending, created) = self.submit_create_account().await?;
        self.confirm(&pending).await?;
        Ok(created)
    }

    pub async fn submit_deploy(
        &self,
        contract_class: serde_json::Value,
        constructor_calldata: Vec<Felt>,
        salt: Option<Felt>,
    ) -> Result<PendingTx> {
        let request = DeployRequest { contract_class, constructor_calldata, salt };
        let deployed = match self.gateway.deploy(&request).await {
            Ok(deployed) => deployed,
            Err(Error::LedgerTransport(reason)) => {
                warn!(reason = %reason, "deployment outcome unknown");
                return Err(Error::SubmissionUnknown { tx_hash: "<deploy>".to_string(), reason });
            }
            Err(e) => return Err(e),
        };
        Ok(PendingTx { handle: deployed.handle, address: Some(deployed.address) })
    }

    pub async fn deploy_contract(
        &self,
        contract_class: serde_json::Value,
        constructor_calldata: Vec<Felt>,
        salt: Option<Felt>,
    ) -> Result<DeployedContract> {
        let pending = self.submit_deploy(contract_class, constructor_calldata, salt).await?;
        let handle = self.confirm(&pending).await?;
        let address = pending
            .address
            .ok_or_else(|| Error::LedgerTransport("deployment returned no address".to_string()))?;
        Ok(DeployedContract { address, handle })
    }

    /// ERC721 constructor: `[name, symbol, owner]`.
    pub fn erc721_constructor(&self, owner: &Felt) -> Result<Vec<Felt>> {
        Ok(vec![
            Felt::from_short_string(&self.contracts.token_name)?,
            Felt::from_short_string(&self.contracts.token_symbol)?,
            owner.clone(),
        ])
    }

    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn deploy_erc721(&self, owner: &Felt) -> Result<DeployedContract> {
        let calldata = self.erc721_constructor(owner)?;
        let deployed = self
            .deploy_contract(self.contracts.erc721_class.clone(), calldata, None)
            .await?;
        info!(contract = %deployed.address, "ERC721 contract deployed");
        Ok(deployed)
    }

    pub async fn mint_batch(
        &self,
        account: &Account,
        contract: &Felt,
        start: Uint256,
        count: u64,
        recipient: &Felt,
    ) -> Result<TxHandle> {
        let calls = mint_calls(contract, recipient, start, count)?;
        self.execute(account, &calls).await
    }

    pub async fn set_token_uri_batch(
        &self,
        account: &Account,
        contract: &Felt,
        start: Uint256,
        count: u64,
        content_hash: Uint256,
    ) -> Result<TxHandle> {
        let calls = set_token_uri_calls(contract, start, count, content_hash)?;
        self.execute(account, &calls).await
    }

    pub async fn transfer(
        &self,
        account: &Account,
        contract: &Felt,
        from: &Felt,
        to: &Felt,
        token_id: Uint256,
    ) -> Result<TxHandle> {
        let calls = CallBatch::from(vec![transfer_call(contract, from, to, token_id)]);
        self.execute(account, &calls).await
    }

    pub async fn burn(&self, account: &Account, contract: &Felt, token_id: Uint256) -> Result<TxHandle> {
        let calls = CallBatch::from(vec![burn_call(contract, token_id)]);
        self.execute(account, &calls).await
    }

    /// Bridge the token to L1. `bridge` falls back to the configured bridge contract.
    pub async fn withdraw(
        &self,
        account: &Account,
        contract: &Felt,
        l1_recipient: &Felt,
        token_id: Uint256,
        bridge: Option<&Felt>,
    ) -> Result<TxHandle> {
        let bridge = bridge.unwrap_or(&self.contracts.bridge_address);
        let calls = CallBatch::from(vec![withdraw_call(contract, l1_recipient, token_id, bridge)]);
        self.execute(account, &calls).await
    }

    /// Read-only; no transaction.
    pub async fn read_token_uri(&self, contract: &Felt, token_id: Uint256) -> Result<TokenUri> {
        let [low, high] = limbs(&token_id);
        let result = self.gateway.call(contract, TOKEN_URI_ENTRYPOINT, &[low, high]).await?;
        match result.as_slice() {
            [low, high] => Ok(TokenUri { value: Uint256::from_felts(low, high)? }),
            other => Err(Error::LedgerTransport(format!(
                "tokenURI returned {} values, expected 2",
                other.len()
            ))),
        }
    }
}
