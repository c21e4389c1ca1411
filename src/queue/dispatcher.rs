//! Job dispatcher.
//!
//! Jobs sharing a group key run strictly one after another in delivery order;
//! different keys run concurrently up to `max_in_flight`. Every job start,
//! redeliveries included, passes a sliding-window rate limiter. Retryable
//! failures are redelivered with backoff a bounded number of times.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::queue::job::Job;
use crate::queue::source::JobSource;
use crate::reporter::backoff_delay;
use crate::saga::SagaHandler;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

#[async_trait]
impl JobHandler for SagaHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        SagaHandler::handle(self, job).await
    }
}

#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    pub limiter_max: u32,
    pub limiter_window: Duration,
    pub max_in_flight: usize,
    pub redelivery_attempts: u32,
    pub redelivery_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        DispatcherSettings {
            limiter_max: 1,
            limiter_window: Duration::from_millis(1000),
            max_in_flight: 4,
            redelivery_attempts: 3,
            redelivery_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// At most `max` starts in any `window`.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        RateLimiter { max: max.max(1) as usize, window, starts: Mutex::new(VecDeque::new()) }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while starts.front().map_or(false, |t| now.duration_since(*t) >= self.window) {
                    starts.pop_front();
                }
                if starts.len() < self.max {
                    starts.push_back(now);
                    return;
                }
                match starts.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum JobOutcome {
    Completed { attempts: u32 },
    Failed { error: Error, attempts: u32 },
}

#[derive(Debug, Default, PartialEq)]
pub struct DispatchSummary {
    pub received: usize,
    pub completed: usize,
    pub failed: usize,
    pub redelivered: usize,
    pub malformed: usize,
    /// Most groups with unfinished jobs at any one time.
    pub peak_groups: usize,
    pub failures: Vec<(String, Error)>,
}

impl DispatchSummary {
    fn record(&mut self, job_id: String, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed { attempts } => {
                self.completed += 1;
                self.redelivered += (attempts - 1) as usize;
            }
            JobOutcome::Failed { error, attempts } => {
                self.failed += 1;
                self.redelivered += (attempts - 1) as usize;
                self.failures.push((job_id, error));
            }
        }
    }

    fn merge(&mut self, other: DispatchSummary) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.redelivered += other.redelivered;
        self.failures.extend(other.failures);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn JobHandler>,
    settings: DispatcherSettings,
    limiter: Arc<RateLimiter>,
    in_flight: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn JobHandler>, settings: DispatcherSettings) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.limiter_max, settings.limiter_window));
        let in_flight = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Dispatcher { handler, settings, limiter, in_flight }
    }

    /// Run one job to its final outcome, redelivering retryable failures.
    pub async fn process(&self, job: &Job) -> JobOutcome {
        let max_attempts = self.settings.redelivery_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            let result = match self.in_flight.acquire().await {
                Ok(_permit) => self.handler.handle(job).await,
                Err(_) => Err(Error::Config("dispatcher closed".to_string())),
            };

            match result {
                Ok(()) => {
                    info!(job_id = %job.id, kind = %job.kind, attempt, "job completed");
                    return JobOutcome::Completed { attempts: attempt };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.settings.redelivery_backoff, attempt - 1, self.settings.max_backoff);
                    warn!(job_id = %job.id, attempt, error = %e, "retryable failure, redelivering in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(job_id = %job.id, kind = %job.kind, attempt, error = %e, "job failed");
                    return JobOutcome::Failed { error: e, attempts: attempt };
                }
            }
        }
    }

    /// Drain `source`, then wait for every accepted job to finish.
    pub async fn run(&self, source: &mut dyn JobSource) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut groups: HashMap<String, Group> = HashMap::new();
        let mut workers = JoinSet::new();

        while let Some(next) = source.next_job().await {
            let job = match next {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable job");
                    summary.malformed += 1;
                    continue;
                }
            };
            summary.received += 1;

            // a group with nothing pending has no queued jobs; dropping its
            // sender lets the worker finish
            groups.retain(|_, group| group.pending.load(Ordering::SeqCst) > 0);
            while let Some(joined) = workers.try_join_next() {
                collect(&mut summary, joined);
            }

            let key = job.group_key();
            let group = groups.entry(key.clone()).or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let pending = Arc::new(AtomicUsize::new(0));
                workers.spawn(self.clone().group_worker(key, receiver, pending.clone()));
                Group { sender, pending }
            });
            group.pending.fetch_add(1, Ordering::SeqCst);
            // the worker holds its receiver until the sender is dropped
            let _ = group.sender.send(job);
            summary.peak_groups = summary.peak_groups.max(groups.len());
        }

        drop(groups);
        while let Some(joined) = workers.join_next().await {
            collect(&mut summary, joined);
        }
        info!(
            received = summary.received,
            completed = summary.completed,
            failed = summary.failed,
            redelivered = summary.redelivered,
            malformed = summary.malformed,
            peak_groups = summary.peak_groups,
            "job source drained"
        );
        summary
    }

    async fn group_worker(
        self,
        key: String,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        pending: Arc<AtomicUsize>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        while let Some(job) = jobs.recv().await {
            let outcome = self.process(&job).await;
            summary.record(job.id.clone(), outcome);
            pending.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(group = %key, "group idle");
        summary
    }
}

struct Group {
    sender: mpsc::UnboundedSender<Job>,
    /// Jobs sent to the worker and not yet finished.
    pending: Arc<AtomicUsize>,
}

fn collect(summary: &mut DispatchSummary, joined: std::result::Result<DispatchSummary, JoinError>) {
    match joined {
        Ok(group_summary) => summary.merge(group_summary),
        Err(e) => error!(error = %e, "group worker panicked"),
    }
}
