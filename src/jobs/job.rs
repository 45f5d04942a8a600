//! Per-job state: configuration, lifecycle, record, snapshot.

use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deferred::{CancelHandle, Completer, DeferredValue, Settled};
use crate::error::Fault;
use crate::runtime::TimerId;
use crate::types::{JobId, Time};

/// The lifecycle of a job.
///
/// ```text
/// Pending ──run──> Running ──ok──> Completed            (terminal)
///                     │
///                     ├──err (retries left)──> Pending
///                     ├──err (exhausted)────> Failed    (terminal)
///                     └──cancel──────────────> Canceled (terminal)
/// Pending ──cancel──> Canceled                          (terminal)
/// ```
///
/// Job timeouts count as exhausted immediately: they never retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting in the queue (or for a retry delay).
    Pending,
    /// Launched; its deferred value is live.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error after exhausting retries.
    Failed,
    /// Cancelled before finishing.
    Canceled,
}

impl JobState {
    /// Returns true for the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Per-job options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Run timeout per attempt; zero means none.
    pub timeout: Duration,
    /// Number of retries after the first failed attempt.
    pub retries: u32,
    /// Delay before a retry is re-queued.
    pub retry_delay: Duration,
    /// Queue priority; higher runs first.
    pub priority: i32,
}

impl JobConfig {
    /// Creates the default configuration: no timeout, no retries,
    /// priority 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::ZERO,
            retries: 0,
            retry_delay: Duration::ZERO,
            priority: 0,
        }
    }

    /// Sets the per-attempt run timeout (zero disables).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the queue priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The scheduler's record of one job.
pub(crate) struct Job<T> {
    pub(crate) cfg: JobConfig,
    pub(crate) state: JobState,
    pub(crate) attempts: u32,
    pub(crate) progress: f64,
    /// Taken out while an attempt invokes it, then put back for retries.
    pub(crate) task: Option<Box<dyn FnMut() -> DeferredValue<T>>>,
    pub(crate) started_at: Option<Time>,
    pub(crate) ended_at: Option<Time>,
    pub(crate) outcome: Option<Settled<T>>,
    /// The decorated deferred value of the running attempt.
    pub(crate) live: Option<DeferredValue<T>>,
    pub(crate) cancel: Option<CancelHandle>,
    /// Lazily created by `wait_for_job`; settles on the terminal state only.
    pub(crate) completion: Option<(DeferredValue<T>, Completer<T>)>,
    pub(crate) retry_timer: Option<TimerId>,
}

impl<T> Job<T> {
    pub(crate) fn new(task: Box<dyn FnMut() -> DeferredValue<T>>, cfg: JobConfig) -> Self {
        Self {
            cfg,
            state: JobState::Pending,
            attempts: 0,
            progress: 0.0,
            task: Some(task),
            started_at: None,
            ended_at: None,
            outcome: None,
            live: None,
            cancel: None,
            completion: None,
            retry_timer: None,
        }
    }
}

/// A copy of a job's observable state, from
/// [`Scheduler::get_job`](crate::Scheduler::get_job).
#[derive(Debug, Clone)]
pub struct JobSnapshot<T> {
    /// The job's id.
    pub id: JobId,
    /// Current lifecycle state.
    pub state: JobState,
    /// The admission-time configuration.
    pub config: JobConfig,
    /// Attempts launched so far.
    pub attempts: u32,
    /// Last reported progress, clamped to `[0, 100]`.
    pub progress: f64,
    /// Launch time of the most recent attempt.
    pub started_at: Option<Time>,
    /// Time the job reached a terminal state.
    pub ended_at: Option<Time>,
    /// The result, once `Completed`.
    pub result: Option<T>,
    /// The error, once `Failed` or `Canceled`.
    pub error: Option<Fault>,
}
