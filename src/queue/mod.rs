//! Work-queue adapter: job envelopes, sources and the dispatcher.

pub mod dispatcher;
pub mod job;
pub mod source;

pub use dispatcher::{DispatchSummary, Dispatcher, DispatcherSettings, JobHandler, JobOutcome, RateLimiter};
pub use job::{Job, JobKind, Operation};
pub use source::{JobSource, JsonLinesSource};
