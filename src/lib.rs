//! Deferval: deferred values and a bounded job scheduler on a
//! deterministic, single-threaded event loop.
//!
//! # Overview
//!
//! Deferval layers two tightly coupled subsystems over one cooperative
//! task runner:
//!
//! - [`DeferredValue`]: a value-or-fault container that settles exactly
//!   once, composes by chaining, assimilates thenables, and extends the
//!   classical contract with timeouts, cooperative cancellation, progress
//!   notification, observable state, and settlement hooks.
//! - [`Scheduler`]: a priority queue of jobs executed under a concurrency
//!   cap, with per-job timeouts, retries with delay, progress propagation,
//!   cancellation, an idle signal, and aggregated statistics.
//!
//! # Core Guarantees
//!
//! - **Single settlement**: a deferred value transitions state at most
//!   once; every chained handler runs at most once, in registration order
//! - **Run-to-completion**: handler dispatch is deferred through the
//!   loop's dispatch policy, so a handler never observes partial
//!   settlement, even when registered on an already-settled value
//! - **Cooperative cancellation**: cancelling rejects the governing value;
//!   it never forcibly stops user code
//! - **Determinism**: the loop runs on a virtual clock; the same enqueue
//!   order produces the same callback order and timestamps
//! - **No stdout/stderr in core**: swallowed panics, double settles, and
//!   unhandled rejections surface through the loop's structured log
//!
//! # Module Structure
//!
//! - [`runtime`]: the event loop, dispatch policies, timers
//! - [`deferred`]: the deferred-value state machine, combinators, timeout
//!   decorator, structured scope
//! - [`jobs`]: the job scheduler
//! - [`error`]: the fault taxonomy
//! - [`observability`]: structured logging
//! - [`types`]: shared value types
//!
//! # Example
//!
//! ```
//! use deferval::{DeferredValue, EventLoop, Step};
//!
//! let lp = EventLoop::default();
//! let h = lp.handle();
//!
//! let doubled = DeferredValue::resolved(&h, 21).then(|v| Step::now(v * 2));
//! lp.run_until_idle();
//! assert_eq!(doubled.value().unwrap(), 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod deferred;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod runtime;
pub mod types;

// Re-exports for convenient access to core types
pub use deferred::{
    CancelHandle, Completer, DeferredValue, DvState, ScopeHandle, Settled, SettleTrace, Step,
    Thenable,
};
pub use error::{Fault, FaultKind, Result, ResultExt};
pub use jobs::{
    JobConfig, JobId, JobSnapshot, JobState, Scheduler, SchedulerConfig, SchedulerStats,
    SchedulerStatus,
};
pub use observability::{LogCollector, LogEntry, LogLevel};
pub use runtime::{DispatchPolicy, EventLoop, LoopHandle, RuntimeConfig, SettlePolicy, TimerId};
pub use types::Time;
