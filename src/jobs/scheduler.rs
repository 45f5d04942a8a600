//! The bounded-concurrency job scheduler.
//!
//! The scheduler is a handle over shared state on the loop thread, like a
//! deferred value: clones share one queue. The queue pump is its invariant
//! guard: while the scheduler is running, a slot is free, and work is
//! queued, the highest-priority pending job launches. Pumping is
//! synchronous within one loop turn and re-entrancy safe: a pump triggered
//! from inside a completion callback or a task body folds into the pump
//! already on the stack instead of re-entering it.

use core::fmt;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deferred::{Completer, DeferredValue, Settled};
use crate::error::{Fault, FaultKind, Result};
use crate::observability::LogEntry;
use crate::runtime::LoopHandle;
use crate::types::JobId;

use super::job::{Job, JobConfig, JobSnapshot, JobState};
use super::stats::{SchedulerStats, SchedulerStatus};

/// Scheduler-level options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running jobs. Clamped to at least 1.
    pub concurrency: usize,
    /// Admission bound on the pending queue; `None` means unbounded.
    pub max_queue_size: Option<usize>,
    /// Whether the pump starts enabled.
    pub auto_start: bool,
    /// Bound on the completed-jobs ledger; `None` retains everything.
    /// Job records themselves are always retained for introspection.
    pub completed_retention: Option<usize>,
}

impl SchedulerConfig {
    /// Creates the default configuration: concurrency 1, unbounded queue,
    /// auto-start, unbounded ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            concurrency: 1,
            max_queue_size: None,
            auto_start: true,
            completed_retention: None,
        }
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Bounds the pending queue.
    #[must_use]
    pub const fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    /// Disables or enables auto-start.
    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Bounds the completed-jobs ledger.
    #[must_use]
    pub const fn with_completed_retention(mut self, retention: usize) -> Self {
        self.completed_retention = Some(retention);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<T> {
    cfg: SchedulerConfig,
    is_running: bool,
    pumping: bool,
    repump: bool,
    next_seq: u64,
    /// Sorted stably by priority descending; head runs next.
    pending: Vec<JobId>,
    running: BTreeSet<JobId>,
    /// Jobs reverted to `Pending` that are waiting out their retry delay.
    retry_waiting: usize,
    jobs: BTreeMap<JobId, Job<T>>,
    completed: VecDeque<JobId>,
    stats: SchedulerStats,
    idle: Option<(DeferredValue<()>, Completer<()>)>,
}

enum CancelAction<T> {
    Queued(Option<Completer<T>>),
    Live {
        cancel: Option<crate::deferred::CancelHandle>,
        completer: Option<Completer<T>>,
    },
}

enum FailureDisposition<T> {
    Requeued,
    RetryAfter(Duration),
    Failed(Option<Completer<T>>),
}

/// A bounded-concurrency priority job scheduler.
///
/// `T` is the value type every job's task produces; heterogeneous
/// workloads wrap their results in one enum. Clones are handles over the
/// same scheduler.
pub struct Scheduler<T> {
    inner: Rc<RefCell<Inner<T>>>,
    h: LoopHandle,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            h: self.h.clone(),
        }
    }
}

impl<T: Clone + 'static> Scheduler<T> {
    /// Creates a scheduler on the given loop.
    #[must_use]
    pub fn new(h: &LoopHandle, config: SchedulerConfig) -> Self {
        let mut cfg = config;
        cfg.concurrency = cfg.concurrency.max(1);
        let is_running = cfg.auto_start;
        Self {
            inner: Rc::new(RefCell::new(Inner {
                cfg,
                is_running,
                pumping: false,
                repump: false,
                next_seq: 0,
                pending: Vec::new(),
                running: BTreeSet::new(),
                retry_waiting: 0,
                jobs: BTreeMap::new(),
                completed: VecDeque::new(),
                stats: SchedulerStats::default(),
                idle: None,
            })),
            h: h.clone(),
        }
    }

    /// Admits a job. Fails with a queue-full fault past the admission
    /// bound; otherwise the job enters the pending queue (re-sorted by
    /// priority, stable) and the pump runs if the scheduler is started.
    pub fn add(
        &self,
        task: impl FnMut() -> DeferredValue<T> + 'static,
        config: JobConfig,
    ) -> Result<JobId> {
        let (id, should_pump) = {
            let mut inner = self.inner.borrow_mut();
            if let Some(max) = inner.cfg.max_queue_size {
                if inner.pending.len() >= max {
                    return Err(Fault::queue_full(max));
                }
            }
            inner.next_seq += 1;
            let id = JobId::new(inner.next_seq);
            inner.jobs.insert(id, Job::new(Box::new(task), config));
            inner.pending.push(id);
            inner.stats.total_jobs += 1;
            Self::sort_pending(&mut inner);
            (id, inner.is_running)
        };
        self.h.log(
            LogEntry::debug("job admitted")
                .with_field("job", id.to_string())
                .with_field("priority", config.priority.to_string()),
        );
        if should_pump {
            // Deferred one tick so a burst of synchronous adds is fully
            // queued (and sorted) before the first launch.
            let sched = self.clone();
            self.h.enqueue_micro(move || sched.pump());
        }
        Ok(id)
    }

    /// Fluent admission: like [`add`](Self::add) but returns the scheduler
    /// for chaining.
    ///
    /// Chaining is purely an enqueue aid. It does not sequence jobs;
    /// priority and the concurrency cap still decide execution order.
    pub fn chain(
        &self,
        task: impl FnMut() -> DeferredValue<T> + 'static,
        config: JobConfig,
    ) -> Result<&Self> {
        self.add(task, config)?;
        Ok(self)
    }

    /// Starts the pump (no-op when already running).
    pub fn start(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.is_running {
                return;
            }
            inner.is_running = true;
        }
        self.pump();
    }

    /// Stops the pump and cancels all known work. Jobs admitted afterwards
    /// queue up but do not run until [`start`](Self::start).
    pub fn stop(&self) {
        self.inner.borrow_mut().is_running = false;
        let _ = self.cancel_all();
    }

    /// Returns whether the pump is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.borrow().is_running
    }

    /// Cancels one job.
    ///
    /// A queued job is dequeued and marked `Canceled`; a running job also
    /// has its live deferred value cancelled cooperatively. Returns false
    /// for unknown or already-terminal jobs.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let fault = Fault::job_cancelled(id);
        let action: CancelAction<T> = {
            let mut inner = self.inner.borrow_mut();
            let now = self.h.now();
            let (was_waiting, action) = {
                let Some(job) = inner.jobs.get_mut(&id) else {
                    return false;
                };
                match job.state {
                    JobState::Pending => {
                        job.state = JobState::Canceled;
                        job.ended_at = Some(now);
                        job.outcome = Some(Settled::Rejected(fault.clone()));
                        let timer = job.retry_timer.take();
                        let completer = job.completion.take().map(|(_, c)| c);
                        if let Some(timer) = timer {
                            self.h.cancel_timer(timer);
                            (true, CancelAction::Queued(completer))
                        } else {
                            (false, CancelAction::Queued(completer))
                        }
                    }
                    JobState::Running => {
                        job.state = JobState::Canceled;
                        job.ended_at = Some(now);
                        job.outcome = Some(Settled::Rejected(fault.clone()));
                        job.live = None;
                        let cancel = job.cancel.take();
                        let completer = job.completion.take().map(|(_, c)| c);
                        (false, CancelAction::Live { cancel, completer })
                    }
                    _ => return false,
                }
            };
            match &action {
                CancelAction::Queued(_) => {
                    if was_waiting {
                        inner.retry_waiting = inner.retry_waiting.saturating_sub(1);
                    } else {
                        inner.pending.retain(|pending| *pending != id);
                    }
                }
                CancelAction::Live { .. } => {
                    inner.running.remove(&id);
                }
            }
            inner.stats.canceled_jobs += 1;
            Self::archive(&mut inner, id);
            action
        };
        self.h
            .log(LogEntry::debug("job cancelled").with_field("job", id.to_string()));
        match action {
            CancelAction::Queued(completer) => {
                if let Some(completer) = completer {
                    completer.reject(fault);
                }
                self.check_idle();
            }
            CancelAction::Live { cancel, completer } => {
                if let Some(cancel) = cancel {
                    cancel.cancel_with(fault.clone());
                }
                if let Some(completer) = completer {
                    completer.reject(fault);
                }
                self.pump();
            }
        }
        true
    }

    /// Cancels every pending and running job; returns the ids cancelled.
    pub fn cancel_all(&self) -> Vec<JobId> {
        let targets: Vec<JobId> = {
            let inner = self.inner.borrow();
            inner
                .jobs
                .iter()
                .filter(|(_, job)| matches!(job.state, JobState::Pending | JobState::Running))
                .map(|(id, _)| *id)
                .collect()
        };
        let mut cancelled = Vec::with_capacity(targets.len());
        for id in targets {
            if self.cancel_job(id) {
                cancelled.push(id);
            }
        }
        self.check_idle();
        cancelled
    }

    /// Returns a snapshot of one job's observable state.
    #[must_use]
    pub fn get_job(&self, id: JobId) -> Option<JobSnapshot<T>> {
        let inner = self.inner.borrow();
        inner.jobs.get(&id).map(|job| JobSnapshot {
            id,
            state: job.state,
            config: job.cfg,
            attempts: job.attempts,
            progress: job.progress,
            started_at: job.started_at,
            ended_at: job.ended_at,
            result: match &job.outcome {
                Some(Settled::Fulfilled(v)) => Some(v.clone()),
                _ => None,
            },
            error: match &job.outcome {
                Some(Settled::Rejected(f)) => Some(f.clone()),
                _ => None,
            },
        })
    }

    /// Returns a snapshot of the scheduler's observable state.
    #[must_use]
    pub fn get_status(&self) -> SchedulerStatus {
        let inner = self.inner.borrow();
        SchedulerStatus {
            is_running: inner.is_running,
            pending: inner.pending.clone(),
            running: inner.running.iter().copied().collect(),
            completed: inner.completed.iter().copied().collect(),
            stats: inner.stats.clone(),
        }
    }

    /// Returns the lifetime counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.borrow().stats.clone()
    }

    /// Returns a deferred value settling with the job's terminal outcome.
    ///
    /// Terminal jobs yield an immediately settled value (a canceled job
    /// rejects with its cancellation fault). Live jobs (queued, waiting
    /// out a retry delay, or running) yield a per-job completion value
    /// that settles only when the job reaches a terminal state, so
    /// per-attempt failures that will be retried are not observable here.
    /// Unknown ids fail with a scheduler fault.
    pub fn wait_for_job(&self, id: JobId) -> Result<DeferredValue<T>> {
        let mut inner = self.inner.borrow_mut();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Err(Fault::scheduler(format!("unknown job {id}")));
        };
        match job.state {
            JobState::Completed => match &job.outcome {
                Some(Settled::Fulfilled(v)) => Ok(DeferredValue::resolved(&self.h, v.clone())),
                _ => Err(Fault::scheduler(format!("missing result for {id}"))),
            },
            JobState::Failed | JobState::Canceled => {
                let fault = match &job.outcome {
                    Some(Settled::Rejected(f)) => f.clone(),
                    _ => Fault::job_cancelled(id),
                };
                Ok(DeferredValue::rejected(&self.h, fault))
            }
            JobState::Pending | JobState::Running => {
                if let Some((dv, _)) = &job.completion {
                    Ok(dv.clone())
                } else {
                    let (dv, completer) = DeferredValue::pending(&self.h);
                    job.completion = Some((dv.clone(), completer));
                    Ok(dv)
                }
            }
        }
    }

    /// Returns a deferred value fulfilling when no job is pending, waiting
    /// on a retry delay, or running.
    ///
    /// When the scheduler is already idle the value is pre-fulfilled.
    /// Otherwise one signal value is shared by every caller until it
    /// fires; the slot then clears so a later call arms a fresh one. The
    /// slot is armed before this call returns, so a pump on this thread
    /// can never observe an unarmed signal and lose the wakeup.
    pub fn on_idle(&self) -> DeferredValue<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.pending.is_empty() && inner.running.is_empty() && inner.retry_waiting == 0 {
            drop(inner);
            return DeferredValue::resolved(&self.h, ());
        }
        if let Some((dv, _)) = &inner.idle {
            return dv.clone();
        }
        let (dv, completer) = DeferredValue::pending(&self.h);
        inner.idle = Some((dv.clone(), completer));
        dv
    }

    // =========================================================================
    // Pump and routing
    // =========================================================================

    /// One admission sweep: launch queued jobs while a slot is free.
    fn pump(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.pumping {
                inner.repump = true;
                return;
            }
            inner.pumping = true;
        }
        loop {
            let launch = {
                let mut inner = self.inner.borrow_mut();
                if !inner.is_running
                    || inner.running.len() >= inner.cfg.concurrency
                    || inner.pending.is_empty()
                {
                    None
                } else {
                    let id = inner.pending.remove(0);
                    inner.running.insert(id);
                    let now = self.h.now();
                    let job = inner.jobs.get_mut(&id).expect("queued job has a record");
                    job.state = JobState::Running;
                    job.started_at = Some(now);
                    job.ended_at = None;
                    job.attempts += 1;
                    let attempt = job.attempts;
                    let timeout = job.cfg.timeout;
                    let task = job.task.take();
                    Some((id, attempt, timeout, task))
                }
            };
            match launch {
                None => break,
                Some((id, attempt, timeout, task)) => self.launch(id, attempt, timeout, task),
            }
        }
        let repump = {
            let mut inner = self.inner.borrow_mut();
            inner.pumping = false;
            std::mem::take(&mut inner.repump)
        };
        self.check_idle();
        if repump {
            self.pump();
        }
    }

    fn launch(
        &self,
        id: JobId,
        attempt: u32,
        timeout: Duration,
        task: Option<Box<dyn FnMut() -> DeferredValue<T>>>,
    ) {
        // The task runs outside any scheduler borrow: it is user code and
        // may re-enter (add, cancel, status).
        let produced = match task {
            Some(mut task) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| task()));
                {
                    let mut inner = self.inner.borrow_mut();
                    if let Some(job) = inner.jobs.get_mut(&id) {
                        job.task = Some(task);
                    }
                }
                outcome.map_err(|payload| Fault::from_panic(payload.as_ref()))
            }
            None => Err(Fault::scheduler(format!("task for {id} is unavailable"))),
        };

        let (final_dv, cancel) = match produced {
            Ok(inner_dv) => {
                let (wrapped, cancel) = DeferredValue::cancellable(&self.h, |_c| {});

                // Progress flows from the task's value through the wrapper's
                // channel and into the job record.
                {
                    let sched = Rc::clone(&self.inner);
                    let forward = wrapped.clone();
                    inner_dv.progress_subscribe(move |p| {
                        if let Some(job) = sched.borrow_mut().jobs.get_mut(&id) {
                            job.progress = p.clamp(0.0, 100.0);
                        }
                        forward.push_progress(p);
                    });
                }
                {
                    let fulfill = wrapped.clone();
                    let reject = wrapped.clone();
                    inner_dv.subscribe(
                        move |v| {
                            fulfill.complete_value(v);
                        },
                        move |f| {
                            reject.complete_fault(f);
                        },
                        true,
                    );
                }

                let final_dv = if timeout > Duration::ZERO {
                    wrapped.timeout_with(timeout, Fault::job_timeout(id, timeout))
                } else {
                    wrapped
                };
                (final_dv, Some(cancel))
            }
            Err(fault) => (DeferredValue::rejected(&self.h, fault), None),
        };

        {
            // The task body may have re-entered and cancelled its own job.
            let mut inner = self.inner.borrow_mut();
            if let Some(job) = inner.jobs.get_mut(&id) {
                if job.state == JobState::Running {
                    job.live = Some(final_dv.clone());
                    job.cancel = cancel;
                }
            }
        }

        let ok = {
            let sched = self.clone();
            move |value: T| sched.route_success(id, attempt, value)
        };
        let err = {
            let sched = self.clone();
            move |fault: Fault| sched.route_failure(id, attempt, fault)
        };
        final_dv.subscribe(ok, err, true);
    }

    fn route_success(&self, id: JobId, attempt: u32, value: T) {
        let completer = {
            let mut inner = self.inner.borrow_mut();
            let now = self.h.now();
            let (elapsed, completer) = {
                let Some(job) = inner.jobs.get_mut(&id) else {
                    return;
                };
                if job.state != JobState::Running || job.attempts != attempt {
                    return;
                }
                job.state = JobState::Completed;
                job.ended_at = Some(now);
                job.progress = 100.0;
                job.outcome = Some(Settled::Fulfilled(value.clone()));
                job.live = None;
                job.cancel = None;
                let elapsed = job.started_at.map_or(Duration::ZERO, |s| now.since(s));
                (elapsed, job.completion.take().map(|(_, c)| c))
            };
            inner.running.remove(&id);
            Self::archive(&mut inner, id);
            inner.stats.completed_jobs += 1;
            inner.stats.total_time += elapsed;
            inner.stats.avg_time = inner
                .stats
                .total_time
                .div_f64(inner.stats.completed_jobs as f64);
            completer
        };
        if let Some(completer) = completer {
            completer.resolve(value);
        }
        self.pump();
    }

    fn route_failure(&self, id: JobId, attempt: u32, fault: Fault) {
        let disposition: FailureDisposition<T> = {
            let mut inner = self.inner.borrow_mut();
            let now = self.h.now();
            let disposition = {
                let Some(job) = inner.jobs.get_mut(&id) else {
                    return;
                };
                if job.state != JobState::Running || job.attempts != attempt {
                    return;
                }
                let retryable = !matches!(
                    fault.kind(),
                    FaultKind::JobTimeout | FaultKind::JobCancelled
                ) && job.attempts <= job.cfg.retries;
                if retryable {
                    job.state = JobState::Pending;
                    job.outcome = None;
                    job.live = None;
                    job.cancel = None;
                    if job.cfg.retry_delay.is_zero() {
                        FailureDisposition::Requeued
                    } else {
                        FailureDisposition::RetryAfter(job.cfg.retry_delay)
                    }
                } else {
                    job.state = JobState::Failed;
                    job.ended_at = Some(now);
                    job.outcome = Some(Settled::Rejected(fault.clone()));
                    job.live = None;
                    job.cancel = None;
                    FailureDisposition::Failed(job.completion.take().map(|(_, c)| c))
                }
            };
            inner.running.remove(&id);
            match &disposition {
                FailureDisposition::Requeued => {
                    inner.pending.push(id);
                    Self::sort_pending(&mut inner);
                }
                FailureDisposition::RetryAfter(_) => {
                    inner.retry_waiting += 1;
                }
                FailureDisposition::Failed(_) => {
                    Self::archive(&mut inner, id);
                    inner.stats.failed_jobs += 1;
                }
            }
            disposition
        };
        match disposition {
            FailureDisposition::Requeued => {
                self.h
                    .log(LogEntry::debug("job requeued for retry").with_field("job", id.to_string()));
            }
            FailureDisposition::RetryAfter(delay) => {
                self.h.log(
                    LogEntry::debug("job retry scheduled")
                        .with_field("job", id.to_string())
                        .with_field("delay", format!("{delay:?}")),
                );
                let sched = self.clone();
                let timer = self.h.set_timer(delay, move || sched.requeue_after_delay(id));
                let mut inner = self.inner.borrow_mut();
                if let Some(job) = inner.jobs.get_mut(&id) {
                    job.retry_timer = Some(timer);
                }
            }
            FailureDisposition::Failed(completer) => {
                self.h.log(
                    LogEntry::debug("job failed")
                        .with_field("job", id.to_string())
                        .with_field("fault", fault.to_string()),
                );
                if let Some(completer) = completer {
                    completer.reject(fault);
                }
            }
        }
        self.pump();
    }

    fn requeue_after_delay(&self, id: JobId) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.retry_waiting = inner.retry_waiting.saturating_sub(1);
            let still_pending = inner
                .jobs
                .get(&id)
                .is_some_and(|job| job.state == JobState::Pending);
            if still_pending {
                if let Some(job) = inner.jobs.get_mut(&id) {
                    job.retry_timer = None;
                }
                inner.pending.push(id);
                Self::sort_pending(&mut inner);
            }
        }
        self.pump();
    }

    fn check_idle(&self) {
        let completer = {
            let mut inner = self.inner.borrow_mut();
            if inner.pending.is_empty() && inner.running.is_empty() && inner.retry_waiting == 0 {
                inner.idle.take().map(|(_, c)| c)
            } else {
                None
            }
        };
        if let Some(completer) = completer {
            completer.resolve(());
        }
    }

    fn sort_pending(inner: &mut Inner<T>) {
        let mut pending = std::mem::take(&mut inner.pending);
        pending.sort_by_key(|id| {
            std::cmp::Reverse(inner.jobs.get(id).map_or(0, |job| job.cfg.priority))
        });
        inner.pending = pending;
    }

    fn archive(inner: &mut Inner<T>, id: JobId) {
        inner.completed.push_back(id);
        if let Some(cap) = inner.cfg.completed_retention {
            while inner.completed.len() > cap {
                inner.completed.pop_front();
            }
        }
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("is_running", &inner.is_running)
            .field("pending", &inner.pending.len())
            .field("running", &inner.running.len())
            .field("jobs", &inner.jobs.len())
            .finish()
    }
}
