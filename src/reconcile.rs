//! Reconciliation of transactions whose finality was not observed in time.
//!
//! A saga that hits `FinalityTimeout` marks its records FAILED and hands the
//! transaction handle, plus the success writes it would have made, to the
//! [`Reconciler`]. Each sweep asks the ledger once per tracked handle:
//! accepted handles get their success writes replayed, rejected ones get the
//! transaction re-marked FAILED with the ledger's reason, and handles still
//! pending past `max_age` are dropped for manual follow-up.
//!
//! With a `state_path` the tracked list is rewritten after every change and
//! restored at startup, so a restart does not forget unresolved handles.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::ledger::{LedgerGateway, TxHandle, TxStatus};
use crate::error::{Error, Result};
use crate::reporter::{StatusReporter, StatusUpdate};
use crate::rpc::types::TransactionUpdate;

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    pub sweep_interval: Duration,
    pub max_age: Duration,
    pub state_path: Option<PathBuf>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            sweep_interval: Duration::from_secs(60),
            max_age: Duration::from_secs(24 * 60 * 60),
            state_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedTx {
    job_id: String,
    transaction_id: String,
    handle: TxHandle,
    updates: Vec<StatusUpdate>,
    registered_at: DateTime<Utc>,
}

impl TrackedTx {
    pub fn new(job_id: &str, transaction_id: &str, handle: TxHandle, updates: Vec<StatusUpdate>) -> Self {
        TrackedTx {
            job_id: job_id.to_string(),
            transaction_id: transaction_id.to_string(),
            handle,
            updates,
            registered_at: Utc::now(),
        }
    }

    pub fn handle(&self) -> &TxHandle {
        &self.handle
    }

    pub fn updates(&self) -> &[StatusUpdate] {
        &self.updates
    }

    fn expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now - self.registered_at >= max_age,
            Err(_) => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub replayed: usize,
    pub rejected: usize,
    pub expired: usize,
    pub pending: usize,
}

pub struct Reconciler {
    gateway: Arc<dyn LedgerGateway>,
    reporter: StatusReporter,
    settings: ReconcileSettings,
    tracked: Mutex<Vec<TrackedTx>>,
}

impl Reconciler {
    pub fn new(gateway: Arc<dyn LedgerGateway>, reporter: StatusReporter, settings: ReconcileSettings) -> Self {
        Reconciler { gateway, reporter, settings, tracked: Mutex::new(Vec::new()) }
    }

    /// Reload the handles a previous process left unresolved. A missing
    /// state file means there are none.
    pub fn restore(&mut self) -> Result<usize> {
        let path = match &self.settings.state_path {
            Some(path) if path.exists() => path,
            _ => return Ok(0),
        };
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read reconciliation state {}: {}", path.display(), e)))?;
        let entries: Vec<TrackedTx> = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("reconciliation state {} is corrupt: {}", path.display(), e)))?;
        let count = entries.len();
        if count > 0 {
            info!(count, path = %path.display(), "restored unresolved transactions");
        }
        *self.tracked.get_mut() = entries;
        Ok(count)
    }

    fn persist(&self, entries: &[TrackedTx]) {
        if let Some(path) = &self.settings.state_path {
            if let Err(e) = write_state(path, entries) {
                error!(path = %path.display(), error = %e, "reconciliation state not saved");
            }
        }
    }

    pub async fn track(&self, entry: TrackedTx) {
        warn!(
            job_id = %entry.job_id,
            transaction_id = %entry.transaction_id,
            tx_hash = %entry.handle,
            "finality unknown, tracking for reconciliation"
        );
        let mut tracked = self.tracked.lock().await;
        tracked.push(entry);
        self.persist(&tracked);
    }

    pub async fn tracked(&self) -> Vec<TrackedTx> {
        self.tracked.lock().await.clone()
    }

    async fn replay(&self, updates: &[StatusUpdate]) -> bool {
        for update in updates {
            if let Err(e) = self.reporter.report(update).await {
                warn!(record = %update, error = %e, "replay not delivered, will retry next sweep");
                return false;
            }
        }
        true
    }

    /// One pass over every tracked handle. Entries leave the list only once
    /// resolved, so an interrupted sweep loses nothing.
    pub async fn sweep(&self) -> SweepReport {
        let entries = self.tracked.lock().await.clone();
        let mut report = SweepReport::default();
        let mut resolved = Vec::new();
        let now = Utc::now();

        for entry in entries {
            let status = self.gateway.transaction_status(&entry.handle).await;
            match status {
                Ok(TxStatus::Accepted) => {
                    if self.replay(&entry.updates).await {
                        info!(job_id = %entry.job_id, tx_hash = %entry.handle, "late finality reconciled");
                        report.replayed += 1;
                        resolved.push(entry.handle);
                    }
                }
                Ok(TxStatus::Rejected { reason }) => {
                    let error = Error::LedgerRejected { tx_hash: entry.handle.to_string(), reason };
                    let update = StatusUpdate::transaction(
                        &entry.transaction_id,
                        TransactionUpdate::failed(error.status_message()),
                    );
                    if self.replay(std::slice::from_ref(&update)).await {
                        info!(job_id = %entry.job_id, tx_hash = %entry.handle, "late rejection recorded");
                        report.rejected += 1;
                        resolved.push(entry.handle);
                    }
                }
                Ok(TxStatus::Pending) | Err(_) => {
                    if let Err(e) = &status {
                        debug!(tx_hash = %entry.handle, error = %e, "status poll failed");
                    }
                    if entry.expired(now, self.settings.max_age) {
                        error!(
                            job_id = %entry.job_id,
                            transaction_id = %entry.transaction_id,
                            tx_hash = %entry.handle,
                            "transaction still unresolved, giving up; reconcile manually"
                        );
                        report.expired += 1;
                        resolved.push(entry.handle);
                    } else {
                        report.pending += 1;
                    }
                }
            }
        }

        if !resolved.is_empty() {
            let mut tracked = self.tracked.lock().await;
            tracked.retain(|entry| !resolved.contains(&entry.handle));
            self.persist(&tracked);
        }
        report
    }

    /// Sweep on the configured interval until `shutdown` flips. A sweep in
    /// progress always runs to the end.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => return,
            }
            let report = self.sweep().await;
            if report != SweepReport::default() {
                info!(
                    replayed = report.replayed,
                    rejected = report.rejected,
                    expired = report.expired,
                    pending = report.pending,
                    "reconciliation sweep"
                );
            }
        }
    }
}

/// Write to a sibling temp file and rename over the old state. Entries can
/// carry account keys, so the file is owner-only on unix.
fn write_state(path: &Path, entries: &[TrackedTx]) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}
