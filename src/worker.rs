//! Process wiring: builds the gateway, reporter, sagas, reconciler and
//! dispatcher from configuration and runs them over a job source.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::account::{AccountOperations, ContractArtifacts};
use crate::client::ledger::{JsonRpcLedger, LedgerGateway};
use crate::client::status::{JsonRpcStatusService, StatusService};
use crate::config::WorkerConfig;
use crate::crypto::{RandomWallets, WalletSource};
use crate::error::{Error, Result};
use crate::queue::{DispatchSummary, Dispatcher, JobSource};
use crate::reconcile::Reconciler;
use crate::reporter::StatusReporter;
use crate::saga::{SagaContext, SagaHandler};
use crate::transaction::PedersenHasher;

pub fn ledger_from_config(config: &WorkerConfig) -> Result<Arc<JsonRpcLedger>> {
    let ledger = JsonRpcLedger::new(
        config.ledger.rpc_url.clone(),
        Duration::from_secs(config.ledger.request_timeout_secs),
        Duration::from_millis(config.ledger.poll_interval_ms),
    )?;
    Ok(Arc::new(ledger))
}

pub fn reporter_from_config(config: &WorkerConfig) -> Result<StatusReporter> {
    let settings = config.reporter_settings();
    let service = JsonRpcStatusService::new(config.status.rpc_url.clone(), settings.call_timeout)
        .map_err(|e| Error::Config(format!("status service client: {}", e)))?;
    Ok(StatusReporter::new(Arc::new(service), settings))
}

pub fn operations_from_config(
    config: &WorkerConfig,
    gateway: Arc<dyn LedgerGateway>,
    artifacts: ContractArtifacts,
) -> Result<AccountOperations> {
    let builder = config.transaction_builder(Arc::new(PedersenHasher))?;
    Ok(AccountOperations::new(gateway, builder, artifacts, config.operation_settings()))
}

pub struct Worker {
    queue: String,
    reporter: StatusReporter,
    reconciler: Arc<Reconciler>,
    dispatcher: Dispatcher,
}

impl Worker {
    /// Wire a worker against the configured ledger node and status service.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let gateway = ledger_from_config(config)?;
        let settings = config.reporter_settings();
        let status = JsonRpcStatusService::new(config.status.rpc_url.clone(), settings.call_timeout)
            .map_err(|e| Error::Config(format!("status service client: {}", e)))?;
        Self::new(
            config,
            gateway,
            Arc::new(status),
            Arc::new(RandomWallets),
            config.load_artifacts()?,
        )
    }

    pub fn new(
        config: &WorkerConfig,
        gateway: Arc<dyn LedgerGateway>,
        status: Arc<dyn StatusService>,
        wallets: Arc<dyn WalletSource>,
        artifacts: ContractArtifacts,
    ) -> Result<Self> {
        let reporter = StatusReporter::new(status, config.reporter_settings());
        let mut reconciler = Reconciler::new(gateway.clone(), reporter.clone(), config.reconcile_settings());
        reconciler.restore()?;
        let reconciler = Arc::new(reconciler);
        let operations = operations_from_config(config, gateway, artifacts)?;
        let ctx = SagaContext {
            operations: Arc::new(operations),
            reporter: reporter.clone(),
            wallets,
            reconciler: Some(reconciler.clone()),
        };
        let dispatcher = Dispatcher::new(Arc::new(SagaHandler::new(ctx)), config.dispatcher_settings());
        Ok(Worker { queue: config.queue_name(), reporter, reconciler, dispatcher })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Block until the status service answers, then drain `source`.
    /// The reconciler sweeps in the background and once more at the end.
    pub async fn run(&self, source: &mut dyn JobSource) -> Result<DispatchSummary> {
        self.reporter.wait_until_live().await?;
        info!(queue = %self.queue, "worker started");

        let (stop, stopped) = watch::channel(false);
        let sweeper = tokio::spawn(self.reconciler.clone().run(stopped));
        let summary = self.dispatcher.run(source).await;
        let _ = stop.send(true);
        if let Err(e) = sweeper.await {
            warn!(error = %e, "reconciliation sweeper ended abnormally");
        }

        let report = self.reconciler.sweep().await;
        let unresolved = self.reconciler.tracked().await.len();
        if unresolved > 0 {
            warn!(
                unresolved,
                pending = report.pending,
                "transactions still awaiting finality at shutdown"
            );
        }
        info!(
            queue = %self.queue,
            completed = summary.completed,
            failed = summary.failed,
            "worker stopped"
        );
        Ok(summary)
    }
}
