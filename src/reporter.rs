//! Status reporting on top of the [`StatusService`] boundary.
//!
//! `report` is the only way sagas touch the system of record. It bounds each
//! call with its own timeout (much shorter than the ledger's finality wait),
//! retries transport failures a fixed number of times, and swallows
//! business-level rejections after logging them. Only an exhausted transport
//! surfaces, as [`Error::RpcTransportFailure`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::rpc_client::RpcCallError;
use crate::client::status::StatusService;
use crate::error::{Error, Result};
use crate::rpc::types::{NftUpdate, ProjectUpdate, TransactionUpdate};

const PING_INPUT: &str = "ping";
const PING_OUTPUT: &str = "pong";

/// One forward transition of a status record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "camelCase")]
pub enum StatusUpdate {
    Project { id: String, update: ProjectUpdate },
    Transaction { id: String, update: TransactionUpdate },
    Nft { id: String, update: NftUpdate },
    NftsByTransaction { transaction_id: String, update: NftUpdate },
}

impl StatusUpdate {
    pub fn project(id: impl Into<String>, update: ProjectUpdate) -> Self {
        StatusUpdate::Project { id: id.into(), update }
    }

    pub fn transaction(id: impl Into<String>, update: TransactionUpdate) -> Self {
        StatusUpdate::Transaction { id: id.into(), update }
    }

    pub fn nft(id: impl Into<String>, update: NftUpdate) -> Self {
        StatusUpdate::Nft { id: id.into(), update }
    }

    pub fn nfts_by_transaction(transaction_id: impl Into<String>, update: NftUpdate) -> Self {
        StatusUpdate::NftsByTransaction { transaction_id: transaction_id.into(), update }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            StatusUpdate::Project { .. } => "project",
            StatusUpdate::Transaction { .. } => "transaction",
            StatusUpdate::Nft { .. } => "nft",
            StatusUpdate::NftsByTransaction { .. } => "nfts-by-transaction",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            StatusUpdate::Project { id, .. }
            | StatusUpdate::Transaction { id, .. }
            | StatusUpdate::Nft { id, .. } => id,
            StatusUpdate::NftsByTransaction { transaction_id, .. } => transaction_id,
        }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity(), self.id())
    }
}

#[derive(Clone, Debug)]
pub struct ReporterSettings {
    pub call_timeout: Duration,
    pub attempts: u32,
    pub backoff: Duration,
    pub liveness_attempts: u32,
    pub liveness_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        ReporterSettings {
            call_timeout: Duration::from_secs(10),
            attempts: 3,
            backoff: Duration::from_millis(500),
            liveness_attempts: 8,
            liveness_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// `base * 2^attempt`, capped.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(cap)
}

#[derive(Clone)]
pub struct StatusReporter {
    service: Arc<dyn StatusService>,
    settings: ReporterSettings,
}

impl StatusReporter {
    pub fn new(service: Arc<dyn StatusService>, settings: ReporterSettings) -> Self {
        StatusReporter { service, settings }
    }

    async fn dispatch(&self, update: &StatusUpdate) -> std::result::Result<(), RpcCallError> {
        match update {
            StatusUpdate::Project { id, update } => self.service.update_project_by_id(id, update).await,
            StatusUpdate::Transaction { id, update } => self.service.update_transaction_by_id(id, update).await,
            StatusUpdate::Nft { id, update } => self.service.update_nft_by_id(id, update).await,
            StatusUpdate::NftsByTransaction { transaction_id, update } => {
                self.service.update_nft_by_transaction_id(transaction_id, update).await
            }
        }
    }

    /// Deliver one update. Safe to call again with the same update.
    pub async fn report(&self, update: &StatusUpdate) -> Result<()> {
        let attempts = self.settings.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match tokio::time::timeout(self.settings.call_timeout, self.dispatch(update)).await {
                Ok(Ok(())) => {
                    debug!(record = %update, "status update delivered");
                    return Ok(());
                }
                Ok(Err(RpcCallError::Remote(rejection))) => {
                    warn!(record = %update, code = rejection.code, reason = %rejection.message, "status update rejected by service");
                    return Ok(());
                }
                Ok(Err(RpcCallError::Decode(msg))) => {
                    // the service answered; only its acknowledgement was unreadable
                    warn!(record = %update, error = %msg, "unreadable status acknowledgement");
                    return Ok(());
                }
                Ok(Err(RpcCallError::Transport(msg))) => last_error = msg,
                Err(_) => last_error = format!("no answer within {:?}", self.settings.call_timeout),
            }

            if attempt + 1 < attempts {
                let delay = backoff_delay(self.settings.backoff, attempt, self.settings.max_backoff);
                warn!(record = %update, attempt = attempt + 1, error = %last_error, "status update failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(Error::RpcTransportFailure(format!(
            "{} not delivered after {} attempts: {}",
            update, attempts, last_error
        )))
    }

    pub async fn update_project(&self, id: &str, update: ProjectUpdate) -> Result<()> {
        self.report(&StatusUpdate::project(id, update)).await
    }

    pub async fn update_transaction(&self, id: &str, update: TransactionUpdate) -> Result<()> {
        self.report(&StatusUpdate::transaction(id, update)).await
    }

    pub async fn update_nft(&self, id: &str, update: NftUpdate) -> Result<()> {
        self.report(&StatusUpdate::nft(id, update)).await
    }

    pub async fn update_nfts_by_transaction(&self, transaction_id: &str, update: NftUpdate) -> Result<()> {
        self.report(&StatusUpdate::nfts_by_transaction(transaction_id, update)).await
    }

    /// Single liveness check.
    pub async fn ping(&self) -> Result<()> {
        match tokio::time::timeout(self.settings.call_timeout, self.service.ping(PING_INPUT)).await {
            Ok(Ok(output)) if output == PING_OUTPUT => Ok(()),
            Ok(Ok(output)) => Err(Error::RpcTransportFailure(format!("unexpected ping reply {:?}", output))),
            Ok(Err(e)) => Err(Error::RpcTransportFailure(e.to_string())),
            Err(_) => Err(Error::RpcTransportFailure(format!(
                "ping timed out after {:?}",
                self.settings.call_timeout
            ))),
        }
    }

    /// Ping until the service answers `pong`, giving up after the configured attempts.
    pub async fn wait_until_live(&self) -> Result<()> {
        let attempts = self.settings.liveness_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match self.ping().await {
                Ok(()) => {
                    info!(attempts = attempt + 1, "status service is live");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, max = attempts, error = %e, "status service not live yet");
                    last_error = Some(e);
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(self.settings.liveness_backoff, attempt, self.settings.max_backoff)).await;
            }
        }
        Err(Error::RpcTransportFailure(format!(
            "status service not live after {} attempts: {}",
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
