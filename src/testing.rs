//! Scripted collaborators for unit tests: an in-memory ledger and a status
//! service that records what it was told.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::account::{Account, AccountOperations, ContractArtifacts, OperationSettings};
use crate::client::ledger::{DeployRequest, DeployedContract, Finality, LedgerGateway, TxHandle, TxStatus};
use crate::client::rpc_client::RpcCallError;
use crate::client::status::StatusService;
use crate::crypto::{ExternalWallet, KeyPair, WalletSource};
use crate::encoding::Felt;
use crate::error::{Error, Result};
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::reporter::{ReporterSettings, StatusReporter, StatusUpdate};
use crate::rpc::types::{NftUpdate, ProjectStatus, ProjectUpdate, RpcError, TransactionStatus, TransactionUpdate};
use crate::saga::SagaContext;
use crate::transaction::{PedersenHasher, Transaction, TransactionBuilder};

pub const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";
/// First account derived from [`TEST_MNEMONIC`].
pub const TEST_WALLET_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const BRIDGE: &str = "0xeE16740C93807E9C4d9dF293548E93d331AdD918";

pub fn test_private_key() -> String {
    "0x0139fe4d6f02e666e86a6f58e65060f115cd3c185bd9e98bd829636931458f79".to_string()
}

pub fn fast_reporter_settings() -> ReporterSettings {
    ReporterSettings {
        call_timeout: Duration::from_secs(1),
        attempts: 3,
        backoff: Duration::from_millis(1),
        liveness_attempts: 3,
        liveness_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn signer_account(seed: u64) -> Account {
    let keypair = KeyPair::from_private_key_hex(&format!("{:x}", seed.max(1))).unwrap();
    Account::new(Felt::from(seed), Arc::new(keypair))
}

pub fn operations(ledger: Arc<StubLedger>) -> AccountOperations {
    let builder = TransactionBuilder::new(
        Felt::from_short_string("SN_GOERLI").unwrap(),
        Felt::zero(),
        Felt::zero(),
        Arc::new(PedersenHasher),
    );
    let contracts = ContractArtifacts {
        account_class: json!({ "abi": [], "name": "Account" }),
        erc721_class: json!({ "abi": [], "name": "ERC721_bridge" }),
        token_name: "CodeLightNFT".to_string(),
        token_symbol: "CLN".to_string(),
        bridge_address: Felt::parse(BRIDGE).unwrap(),
    };
    let settings = OperationSettings { finality_timeout: Duration::from_millis(50), nonce_attempts: 3 };
    AccountOperations::new(ledger, builder, contracts, settings)
}

/// Always hands out the wallet of [`TEST_MNEMONIC`].
pub struct FixedWallets;

impl WalletSource for FixedWallets {
    fn create(&self) -> Result<ExternalWallet> {
        ExternalWallet::from_mnemonic(TEST_MNEMONIC)
    }
}

pub fn saga_context(ledger: Arc<StubLedger>, status: Arc<RecordingStatusService>) -> SagaContext {
    let reporter = StatusReporter::new(status, fast_reporter_settings());
    let reconciler = Reconciler::new(ledger.clone(), reporter.clone(), ReconcileSettings::default());
    SagaContext {
        operations: Arc::new(operations(ledger)),
        reporter,
        wallets: Arc::new(FixedWallets),
        reconciler: Some(Arc::new(reconciler)),
    }
}

#[derive(Default)]
struct LedgerState {
    nonce: u64,
    nonce_reads: u32,
    stale_remaining: u32,
    lost_responses: u32,
    invoke_finality: Option<Finality>,
    submitted: Vec<Transaction>,
    deploys: Vec<DeployRequest>,
    deploy_finality: HashMap<usize, Finality>,
    rejected_deploys: HashMap<usize, String>,
    finality: HashMap<Felt, Finality>,
    status_overrides: HashMap<Felt, TxStatus>,
    call_result: Vec<Felt>,
    queries: Vec<(Felt, String, Vec<Felt>)>,
}

/// Single-account ledger. Invokes and deploys finalize immediately unless
/// scripted otherwise; deploy `i` (zero-based) lands at `0xa000 + i` with
/// hash `0xd000 + i`.
#[derive(Default)]
pub struct StubLedger {
    state: Mutex<LedgerState>,
}

impl StubLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` submissions as stale; each refusal moves the
    /// on-chain nonce forward as if another transaction had landed.
    pub fn stale_nonces(&self, n: u32) {
        self.state.lock().unwrap().stale_remaining = n;
    }

    /// Apply the next `n` submissions or deployments, then fail as if the
    /// connection dropped before the answer arrived.
    pub fn lose_responses(&self, n: u32) {
        self.state.lock().unwrap().lost_responses = n;
    }

    pub fn set_finality(&self, finality: Finality) {
        self.state.lock().unwrap().invoke_finality = Some(finality);
    }

    pub fn reject_deploy(&self, index: usize, reason: &str) {
        self.state.lock().unwrap().rejected_deploys.insert(index, reason.to_string());
    }

    pub fn set_deploy_finality(&self, index: usize, finality: Finality) {
        self.state.lock().unwrap().deploy_finality.insert(index, finality);
    }

    pub fn set_status(&self, hash: &Felt, status: TxStatus) {
        self.state.lock().unwrap().status_overrides.insert(hash.clone(), status);
    }

    pub fn set_call_result(&self, result: Vec<Felt>) {
        self.state.lock().unwrap().call_result = result;
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn deploys(&self) -> Vec<DeployRequest> {
        self.state.lock().unwrap().deploys.clone()
    }

    pub fn nonce_reads(&self) -> u32 {
        self.state.lock().unwrap().nonce_reads
    }

    pub fn queries(&self) -> Vec<(Felt, String, Vec<Felt>)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn transaction_status_of(&self, handle: &TxHandle) -> TxStatus {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.status_overrides.get(&handle.hash) {
            return status.clone();
        }
        match state.finality.get(&handle.hash) {
            Some(Finality::Finalized) => TxStatus::Accepted,
            Some(Finality::Rejected { reason }) => TxStatus::Rejected { reason: reason.clone() },
            Some(Finality::TimedOut) | None => TxStatus::Pending,
        }
    }
}

#[async_trait]
impl LedgerGateway for StubLedger {
    async fn get_nonce(&self, _address: &Felt) -> Result<Felt> {
        let mut state = self.state.lock().unwrap();
        state.nonce_reads += 1;
        Ok(Felt::from(state.nonce))
    }

    async fn submit(&self, tx: &Transaction) -> Result<TxHandle> {
        let mut state = self.state.lock().unwrap();
        if state.stale_remaining > 0 {
            state.stale_remaining -= 1;
            state.nonce += 1;
            return Err(Error::StaleNonce(format!("nonce {} already used", tx.nonce())));
        }
        if tx.nonce() != &Felt::from(state.nonce) {
            return Err(Error::StaleNonce(format!("expected nonce {}, got {}", state.nonce, tx.nonce())));
        }
        state.nonce += 1;
        let finality = state.invoke_finality.clone().unwrap_or(Finality::Finalized);
        state.finality.insert(tx.hash().clone(), finality);
        state.submitted.push(tx.clone());
        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(Error::LedgerTransport("connection reset after send".to_string()));
        }
        Ok(TxHandle::new(tx.hash().clone()))
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<DeployedContract> {
        let mut state = self.state.lock().unwrap();
        let index = state.deploys.len();
        state.deploys.push(request.clone());
        let hash = Felt::from(0xd000 + index as u64);
        if let Some(reason) = state.rejected_deploys.get(&index) {
            return Err(Error::LedgerRejected { tx_hash: hash.to_hex(), reason: reason.clone() });
        }
        let finality = state.deploy_finality.get(&index).cloned().unwrap_or(Finality::Finalized);
        state.finality.insert(hash.clone(), finality);
        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(Error::LedgerTransport("connection reset after send".to_string()));
        }
        Ok(DeployedContract { address: Felt::from(0xa000 + index as u64), handle: TxHandle::new(hash) })
    }

    async fn transaction_status(&self, handle: &TxHandle) -> Result<TxStatus> {
        Ok(self.transaction_status_of(handle))
    }

    async fn await_finality(&self, handle: &TxHandle, _timeout: Duration) -> Result<Finality> {
        let state = self.state.lock().unwrap();
        Ok(state.finality.get(&handle.hash).cloned().unwrap_or(Finality::TimedOut))
    }

    async fn call(&self, contract: &Felt, entrypoint: &str, calldata: &[Felt]) -> Result<Vec<Felt>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((contract.clone(), entrypoint.to_string(), calldata.to_vec()));
        Ok(state.call_result.clone())
    }
}

#[derive(Default)]
struct StatusState {
    calls: u32,
    transport_failures: u32,
    rejection: Option<String>,
    updates: Vec<StatusUpdate>,
}

/// Status service that keeps every delivered update in order.
#[derive(Default)]
pub struct RecordingStatusService {
    state: Mutex<StatusState>,
}

fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

impl RecordingStatusService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls (pings included) at the transport level.
    pub fn fail_transport(&self, n: u32) {
        self.state.lock().unwrap().transport_failures = n;
    }

    /// Answer every update with a business-level error.
    pub fn reject_all(&self, message: &str) {
        self.state.lock().unwrap().rejection = Some(message.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.state.lock().unwrap().calls
    }

    /// Delivered updates, oldest first.
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.state.lock().unwrap().updates.clone()
    }

    fn admit(&self) -> std::result::Result<(), RpcCallError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            return Err(RpcCallError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn record(&self, update: StatusUpdate) -> std::result::Result<(), RpcCallError> {
        self.admit()?;
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.rejection {
            return Err(RpcCallError::Remote(RpcError { code: -32000, message: message.clone(), data: None }));
        }
        state.updates.push(update);
        Ok(())
    }

    fn project_updates(&self, id: &str) -> Vec<ProjectUpdate> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                StatusUpdate::Project { id: pid, update } if pid == id => Some(update),
                _ => None,
            })
            .collect()
    }

    fn transaction_updates(&self, id: &str) -> Vec<TransactionUpdate> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                StatusUpdate::Transaction { id: tid, update } if tid == id => Some(update),
                _ => None,
            })
            .collect()
    }

    fn merged_nft(&self, pick: impl Fn(&StatusUpdate) -> Option<&NftUpdate>) -> Option<NftUpdate> {
        let updates = self.updates();
        let mut found = updates.iter().filter_map(|u| pick(u)).peekable();
        found.peek()?;
        let mut merged = NftUpdate::default();
        for update in found {
            merge(&mut merged.metadata_id, &update.metadata_id);
            merge(&mut merged.mint_tx_hash, &update.mint_tx_hash);
            merge(&mut merged.owner, &update.owner);
            merge(&mut merged.tx_hash, &update.tx_hash);
            merge(&mut merged.status, &update.status);
        }
        Some(merged)
    }

    /// Current view of a project after applying every upsert.
    pub fn project(&self, id: &str) -> Option<ProjectUpdate> {
        let updates = self.project_updates(id);
        if updates.is_empty() {
            return None;
        }
        let mut merged = ProjectUpdate::default();
        for update in &updates {
            merge(&mut merged.master_address, &update.master_address);
            merge(&mut merged.master_private_key, &update.master_private_key);
            merge(&mut merged.l1_mnemonic, &update.l1_mnemonic);
            merge(&mut merged.contract721_address, &update.contract721_address);
            merge(&mut merged.status, &update.status);
        }
        Some(merged)
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionUpdate> {
        let updates = self.transaction_updates(id);
        if updates.is_empty() {
            return None;
        }
        let mut merged = TransactionUpdate::default();
        for update in &updates {
            merge(&mut merged.status, &update.status);
            merge(&mut merged.tx_hash, &update.tx_hash);
            merge(&mut merged.error, &update.error);
        }
        Some(merged)
    }

    pub fn nft(&self, id: &str) -> Option<NftUpdate> {
        self.merged_nft(|u| match u {
            StatusUpdate::Nft { id: nid, update } if nid == id => Some(update),
            _ => None,
        })
    }

    pub fn nfts_by_transaction(&self, transaction_id: &str) -> Option<NftUpdate> {
        self.merged_nft(|u| match u {
            StatusUpdate::NftsByTransaction { transaction_id: tid, update } if tid == transaction_id => Some(update),
            _ => None,
        })
    }

    /// Every status a project was moved through, in order.
    pub fn project_statuses(&self, id: &str) -> Vec<ProjectStatus> {
        self.project_updates(id).into_iter().filter_map(|u| u.status).collect()
    }

    pub fn transaction_statuses(&self, id: &str) -> Vec<TransactionStatus> {
        self.transaction_updates(id).into_iter().filter_map(|u| u.status).collect()
    }
}

#[async_trait]
impl StatusService for RecordingStatusService {
    async fn update_project_by_id(&self, id: &str, update: &ProjectUpdate) -> std::result::Result<(), RpcCallError> {
        self.record(StatusUpdate::project(id, update.clone()))
    }

    async fn update_transaction_by_id(
        &self,
        id: &str,
        update: &TransactionUpdate,
    ) -> std::result::Result<(), RpcCallError> {
        self.record(StatusUpdate::transaction(id, update.clone()))
    }

    async fn update_nft_by_id(&self, id: &str, update: &NftUpdate) -> std::result::Result<(), RpcCallError> {
        self.record(StatusUpdate::nft(id, update.clone()))
    }

    async fn update_nft_by_transaction_id(&self, id: &str, update: &NftUpdate) -> std::result::Result<(), RpcCallError> {
        self.record(StatusUpdate::nfts_by_transaction(id, update.clone()))
    }

    async fn ping(&self, input: &str) -> std::result::Result<String, RpcCallError> {
        self.admit()?;
        Ok(if input == "ping" { "pong".to_string() } else { input.to_string() })
    }
}
