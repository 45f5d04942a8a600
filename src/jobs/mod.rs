//! The job scheduler: priority admission, concurrency gating, retries.
//!
//! A [`Scheduler`] owns a set of jobs, each a nullary producer of a
//! [`DeferredValue`](crate::DeferredValue). Jobs wait in a priority queue
//! and run under a concurrency cap; each running job's value is wrapped in
//! a cancellable value (so the scheduler can cancel it cooperatively) and,
//! when configured, a timeout decorator. Failures retry with a delay until
//! the retry budget is exhausted; job timeouts never retry.
//!
//! Job records are retained for introspection for the scheduler's
//! lifetime; the completed-jobs ledger can be bounded via
//! [`SchedulerConfig::completed_retention`].

pub mod job;
pub mod scheduler;
pub mod stats;

pub use job::{JobConfig, JobSnapshot, JobState};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stats::{SchedulerStats, SchedulerStatus};

pub use crate::types::JobId;
