//! The cooperative single-threaded event loop.
//!
//! Everything in this crate executes on one logical task runner: an
//! [`EventLoop`] owning a microtask queue, a macrotask queue, a timer queue,
//! and a virtual clock. Callbacks run sequentially between suspension
//! points; "concurrency" means interleaving of suspended work, never
//! parallel execution.
//!
//! The loop is deterministic. Time only moves when the loop advances it:
//! when both task queues are empty, [`EventLoop::run_until_idle`] jumps the
//! clock to the earliest timer deadline and fires the timers due there.
//! Given the same enqueue order, a run produces the same callback order and
//! the same timestamps, which is what makes timeout and retry behavior
//! testable without wall-clock sleeps.
//!
//! # Run discipline
//!
//! One quantum of work is, in order of preference:
//!
//! 1. run one microtask (so the microtask queue drains fully before
//!    anything else),
//! 2. else run one macrotask,
//! 3. else advance the clock to the next timer deadline and move the due
//!    timers onto the macrotask queue.
//!
//! Handler dispatch always goes through [`LoopHandle::defer`] under the
//! configured [`DispatchPolicy`], which is what guarantees
//! run-to-completion: a handler never observes partial settlement of the
//! value it is registered on.

pub mod config;
pub mod timer;

pub use config::{DispatchPolicy, RuntimeConfig, SettlePolicy};
pub use timer::TimerId;

use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::observability::{LogCollector, LogEntry};
use crate::types::Time;
use timer::TimerQueue;

type Step = Box<dyn FnOnce()>;

struct LoopState {
    micro: VecDeque<Step>,
    macro_q: VecDeque<Step>,
    timers: TimerQueue,
    now: Time,
    steps: u64,
    dispatch: DispatchPolicy,
    settle: SettlePolicy,
    progress_buffer: usize,
    log: LogCollector,
}

enum Quantum {
    Task(Step),
    Advanced,
    Idle,
}

/// The event loop. Owns all queues and the virtual clock.
///
/// Handles to the loop ([`LoopHandle`]) are what deferred values and
/// schedulers hold; the loop itself stays with the embedder, which drives
/// it with [`run_until_idle`](Self::run_until_idle) or [`step`](Self::step).
pub struct EventLoop {
    inner: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    /// Creates a loop with the given configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LoopState {
                micro: VecDeque::new(),
                macro_q: VecDeque::new(),
                timers: TimerQueue::new(),
                now: Time::ZERO,
                steps: 0,
                dispatch: config.dispatch,
                settle: config.settle,
                progress_buffer: config.progress_buffer,
                log: LogCollector::new(config.log_capacity).with_min_level(config.log_level),
            })),
        }
    }

    /// Returns a cheap handle to this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.borrow().now
    }

    /// Returns the number of tasks executed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.inner.borrow().steps
    }

    /// Returns true if no task, macrotask, or timer remains.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let mut state = self.inner.borrow_mut();
        state.micro.is_empty() && state.macro_q.is_empty() && state.timers.next_deadline().is_none()
    }

    /// Executes one quantum of work. Returns false when idle.
    pub fn step(&self) -> bool {
        let quantum = {
            let mut state = self.inner.borrow_mut();
            if let Some(task) = state.micro.pop_front() {
                Quantum::Task(task)
            } else if let Some(task) = state.macro_q.pop_front() {
                Quantum::Task(task)
            } else if let Some(deadline) = state.timers.next_deadline() {
                if deadline > state.now {
                    state.now = deadline;
                }
                let now = state.now;
                let due = state.timers.pop_due(now);
                for task in due {
                    state.macro_q.push_back(task);
                }
                Quantum::Advanced
            } else {
                Quantum::Idle
            }
        };
        match quantum {
            Quantum::Task(task) => {
                task();
                self.inner.borrow_mut().steps += 1;
                true
            }
            Quantum::Advanced => true,
            Quantum::Idle => false,
        }
    }

    /// Runs until no work remains. Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> u64 {
        let before = self.steps();
        while self.step() {}
        self.steps() - before
    }

    /// Advances the clock by `duration` without running anything; timers
    /// that come due are moved to the macrotask queue.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.borrow_mut();
        state.now = state.now.saturating_add(duration);
        let now = state.now;
        let due = state.timers.pop_due(now);
        for task in due {
            state.macro_q.push_back(task);
        }
    }

    /// Drains the loop's log collector.
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.inner.borrow_mut().log.drain()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("micro", &state.micro.len())
            .field("macro", &state.macro_q.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}

/// A cheap, clonable, `!Send` capability handle to an [`EventLoop`].
///
/// Every deferred value and scheduler holds one; it is how they defer
/// handler dispatch, arm timers, read the clock, and log.
pub struct LoopHandle {
    inner: Rc<RefCell<LoopState>>,
}

impl Clone for LoopHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl LoopHandle {
    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.borrow().now
    }

    /// Defers a step under the loop's dispatch policy.
    pub fn defer(&self, step: impl FnOnce() + 'static) {
        let custom = {
            let mut state = self.inner.borrow_mut();
            match &state.dispatch {
                DispatchPolicy::Microtask => {
                    state.micro.push_back(Box::new(step));
                    return;
                }
                DispatchPolicy::Macrotask => {
                    state.macro_q.push_back(Box::new(step));
                    return;
                }
                DispatchPolicy::Custom(f) => Rc::clone(f),
            }
        };
        custom(Box::new(step));
    }

    /// Enqueues a step on the microtask queue, bypassing the policy.
    ///
    /// Used for protocol-internal jobs (thenable adoption, unhandled
    /// rejection probes) that must run before the next macrotask.
    pub fn enqueue_micro(&self, step: impl FnOnce() + 'static) {
        self.inner.borrow_mut().micro.push_back(Box::new(step));
    }

    /// Enqueues a step on the macrotask queue, bypassing the policy.
    pub fn enqueue_macro(&self, step: impl FnOnce() + 'static) {
        self.inner.borrow_mut().macro_q.push_back(Box::new(step));
    }

    /// Arms a one-shot timer firing `delay` from now.
    pub fn set_timer(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let mut state = self.inner.borrow_mut();
        let deadline = state.now.saturating_add(delay);
        state.timers.schedule(deadline, Box::new(task))
    }

    /// Cancels a timer. Returns false if it already fired or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.inner.borrow_mut().timers.cancel(id)
    }

    /// Records a structured log entry on the loop's collector.
    pub fn log(&self, entry: LogEntry) {
        self.inner.borrow_mut().log.record(entry);
    }

    /// Drains the loop's log collector.
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.inner.borrow_mut().log.drain()
    }

    pub(crate) fn settle_policy(&self) -> SettlePolicy {
        self.inner.borrow().settle
    }

    pub(crate) fn progress_capacity(&self) -> usize {
        self.inner.borrow().progress_buffer
    }

    /// Returns true if both handles point at the same loop.
    #[must_use]
    pub fn same_loop(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("LoopHandle").field("now", &state.now).finish()
    }
}
