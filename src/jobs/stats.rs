//! Scheduler statistics and status snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Aggregated counters over a scheduler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Jobs ever admitted.
    pub total_jobs: u64,
    /// Jobs that reached `Completed`.
    pub completed_jobs: u64,
    /// Jobs that reached `Failed`.
    pub failed_jobs: u64,
    /// Jobs that reached `Canceled`.
    pub canceled_jobs: u64,
    /// Total run time of completed jobs.
    pub total_time: Duration,
    /// Mean run time of completed jobs.
    pub avg_time: Duration,
}

/// A point-in-time snapshot of a scheduler's observable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the queue pump is running.
    pub is_running: bool,
    /// Queued job ids in pump order (priority descending).
    pub pending: Vec<JobId>,
    /// Currently running job ids.
    pub running: Vec<JobId>,
    /// Archived job ids, oldest first (bounded by the retention config).
    pub completed: Vec<JobId>,
    /// Lifetime counters.
    pub stats: SchedulerStats,
}
