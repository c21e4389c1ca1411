//! Saga handlers: one queued job in, ledger effects and status writes out.
//!
//! Each handler is a fixed list of named steps. Progress is reported after
//! every step, so the system of record only ever moves forward. On failure
//! the handler writes the FAILED variants of the affected records and returns
//! the causal error; whether the whole job runs again is the dispatcher's
//! decision.

pub mod nft;
pub mod project;

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::account::{Account, AccountOperations};
use crate::client::ledger::TxHandle;
use crate::crypto::{KeyPair, WalletSource};
use crate::encoding::Felt;
use crate::error::{Error, Result};
use crate::queue::job::{Job, JobKind, Operation, SecretString};
use crate::reconcile::{Reconciler, TrackedTx};
use crate::reporter::{StatusReporter, StatusUpdate};
use crate::rpc::types::TransactionUpdate;

#[derive(Clone, Debug, PartialEq)]
pub enum SagaState {
    Received,
    Executing { step: &'static str },
    Succeeded,
    Failed { step: Option<&'static str>, error: Error },
}

/// Success writes held back because finality was not observed in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Deferred {
    pub handle: TxHandle,
    pub updates: Vec<StatusUpdate>,
}

/// State of one saga attempt.
#[derive(Debug)]
pub struct SagaRun {
    job_id: String,
    kind: JobKind,
    state: SagaState,
    steps: Vec<&'static str>,
    deferred: Option<Deferred>,
}

impl SagaRun {
    pub fn new(job: &Job) -> Self {
        SagaRun {
            job_id: job.id.clone(),
            kind: job.kind,
            state: SagaState::Received,
            steps: Vec::new(),
            deferred: None,
        }
    }

    pub fn step(&mut self, name: &'static str) {
        info!(job_id = %self.job_id, kind = %self.kind, step = name, "saga step");
        self.steps.push(name);
        self.state = SagaState::Executing { step: name };
    }

    pub fn current_step(&self) -> Option<&'static str> {
        match self.state {
            SagaState::Executing { step } => Some(step),
            SagaState::Failed { step, .. } => step,
            _ => None,
        }
    }

    /// Remember what to write if `handle` turns out final after all.
    pub fn defer(&mut self, handle: TxHandle, updates: Vec<StatusUpdate>) {
        self.deferred = Some(Deferred { handle, updates });
    }

    pub fn deferred(&self) -> Option<&Deferred> {
        self.deferred.as_ref()
    }

    fn succeed(&mut self) {
        info!(job_id = %self.job_id, kind = %self.kind, steps = self.steps.len(), "saga succeeded");
        self.deferred = None;
        self.state = SagaState::Succeeded;
    }

    fn fail(&mut self, error: Error) {
        let step = self.current_step();
        error!(job_id = %self.job_id, kind = %self.kind, step = step.unwrap_or("decode"), error = %error, "saga failed");
        self.state = SagaState::Failed { step, error };
    }

    pub fn state(&self) -> &SagaState {
        &self.state
    }

    pub fn steps(&self) -> &[&'static str] {
        &self.steps
    }

    pub fn into_result(self) -> Result<()> {
        match self.state {
            SagaState::Failed { error, .. } => Err(error),
            _ => Ok(()),
        }
    }
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct SagaContext {
    pub operations: Arc<AccountOperations>,
    pub reporter: StatusReporter,
    pub wallets: Arc<dyn WalletSource>,
    pub reconciler: Option<Arc<Reconciler>>,
}

impl SagaContext {
    pub async fn report(&self, update: StatusUpdate) -> Result<()> {
        self.reporter.report(&update).await
    }

    /// Write the FAILED records for `error`. An unreachable status service is
    /// not compensated: nothing can be written and the ledger side may
    /// already be committed.
    pub async fn compensate(&self, run: &SagaRun, job: &Job, error: &Error, updates: Vec<StatusUpdate>) {
        if matches!(error, Error::RpcTransportFailure(_)) {
            error!(
                job_id = %job.id,
                transaction_id = %job.transaction_id,
                step = run.current_step().unwrap_or("decode"),
                error = %error,
                "status service unreachable, records left as last reported"
            );
            return;
        }

        for update in updates {
            if let Err(e) = self.reporter.report(&update).await {
                error!(job_id = %job.id, record = %update, error = %e, "failure status not delivered");
            }
        }

        if let (true, Some(deferred)) = (error.is_ambiguous(), run.deferred()) {
            match &self.reconciler {
                Some(reconciler) => {
                    reconciler
                        .track(TrackedTx::new(
                            &job.id,
                            &job.transaction_id,
                            deferred.handle.clone(),
                            deferred.updates.clone(),
                        ))
                        .await;
                }
                None => warn!(
                    job_id = %job.id,
                    tx_hash = %deferred.handle,
                    "finality unknown and no reconciler running; needs manual follow-up"
                ),
            }
        }
    }
}

/// Locally computed hash of a transaction whose submission answer was lost.
pub fn unconfirmed_handle(error: &Error) -> Option<TxHandle> {
    match error {
        Error::SubmissionUnknown { tx_hash, .. } => Felt::parse(tx_hash).ok().map(TxHandle::new),
        _ => None,
    }
}

/// Transaction FAILED with the causal message.
pub fn transaction_failed(job: &Job, error: &Error) -> StatusUpdate {
    StatusUpdate::transaction(&job.transaction_id, TransactionUpdate::failed(error.status_message()))
}

pub fn transaction_succeeded(job: &Job, tx_hash: Option<&TxHandle>) -> StatusUpdate {
    StatusUpdate::transaction(
        &job.transaction_id,
        TransactionUpdate::success(tx_hash.map(|h| h.to_string())),
    )
}

/// Account that signs with a key delivered in the job payload.
pub fn payload_account(address: &Felt, private_key: &SecretString) -> Result<Account> {
    let keypair = KeyPair::from_private_key_hex(private_key.expose())?;
    Ok(Account::new(address.clone(), Arc::new(keypair)))
}

pub struct SagaHandler {
    ctx: SagaContext,
}

impl SagaHandler {
    pub fn new(ctx: SagaContext) -> Self {
        SagaHandler { ctx }
    }

    pub fn context(&self) -> &SagaContext {
        &self.ctx
    }

    /// Run the job's saga to a terminal state.
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind, transaction_id = %job.transaction_id))]
    pub async fn run(&self, job: &Job) -> SagaRun {
        let mut run = SagaRun::new(job);
        let result = match job.operation() {
            Ok(Operation::CreateProject(p)) => project::create_project(&self.ctx, &mut run, job, &p).await,
            Ok(Operation::MintBatch(p)) => nft::mint_batch(&self.ctx, &mut run, job, &p).await,
            Ok(Operation::Transfer(p)) => nft::transfer(&self.ctx, &mut run, job, &p).await,
            Ok(Operation::Burn(p)) => nft::burn(&self.ctx, &mut run, job, &p).await,
            Ok(Operation::Withdraw(p)) => nft::withdraw(&self.ctx, &mut run, job, &p).await,
            Err(e) => {
                // nothing ran; only the originating transaction can be marked
                self.ctx.compensate(&run, job, &e, vec![transaction_failed(job, &e)]).await;
                Err(e)
            }
        };

        match result {
            Ok(()) => run.succeed(),
            Err(e) => run.fail(e),
        }
        run
    }

    pub async fn handle(&self, job: &Job) -> Result<()> {
        self.run(job).await.into_result()
    }
}
