//! Error types and failure taxonomy for deferval.
//!
//! This module defines the single fault type used across the deferred-value
//! and job-scheduler subsystems. Error handling follows these principles:
//!
//! - Faults are explicit and typed (no stringly-typed errors)
//! - A fault is cheap to clone: one rejection reason fans out to every
//!   registered handler
//! - Panics raised inside user callbacks are isolated and converted to
//!   `FaultKind::Panicked`

use core::fmt;
use std::any::Any;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use crate::types::JobId;

/// The kind of fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    // === Cancellation ===
    /// Cooperative cancellation of a deferred value.
    Cancelled,
    /// A job was cancelled by the scheduler.
    JobCancelled,

    // === Timeouts ===
    /// A timeout decorator expired.
    Timeout,
    /// A job exceeded its configured run timeout.
    JobTimeout,

    // === Scheduler ===
    /// Scheduler-level failure (unknown job, misuse).
    Scheduler,
    /// Admission refused: the pending queue is at capacity.
    QueueFull,

    // === Combinators ===
    /// Every input of `any` rejected; the causes are attached.
    Aggregate,

    // === Programmer errors ===
    /// An accessor was used in a state that does not permit it.
    InvalidState,
    /// A deferred value was resolved with itself.
    SelfResolution,

    // === Computation ===
    /// A user callback panicked.
    Panicked,
    /// User-provided error.
    User,
}

impl FaultKind {
    /// Short lowercase name used in `Display` output and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::JobCancelled => "job cancelled",
            Self::Timeout => "timeout",
            Self::JobTimeout => "job timeout",
            Self::Scheduler => "scheduler",
            Self::QueueFull => "queue full",
            Self::Aggregate => "aggregate",
            Self::InvalidState => "invalid state",
            Self::SelfResolution => "self resolution",
            Self::Panicked => "panicked",
            Self::User => "user",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fault type carried by every rejected deferred value.
///
/// A fault is a kind plus optional context, an optional source error, and
/// structured payloads for the scheduler-level kinds: the job id for
/// [`FaultKind::JobTimeout`] / [`FaultKind::JobCancelled`], the exceeded
/// limit for [`FaultKind::JobTimeout`], and the per-input causes for
/// [`FaultKind::Aggregate`]. The construction site is captured for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    job: Option<JobId>,
    limit: Option<Duration>,
    causes: Vec<Fault>,
    at: &'static Location<'static>,
}

impl Fault {
    /// Creates a new fault with the given kind.
    #[must_use]
    #[track_caller]
    pub fn new(kind: FaultKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
            job: None,
            limit: None,
            causes: Vec::new(),
            at: Location::caller(),
        }
    }

    /// Creates a cooperative-cancellation fault.
    #[must_use]
    #[track_caller]
    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled)
    }

    /// Creates a timeout fault.
    #[must_use]
    #[track_caller]
    pub fn timeout() -> Self {
        Self::new(FaultKind::Timeout)
    }

    /// Creates a job-timeout fault carrying the job id and the exceeded limit.
    #[must_use]
    #[track_caller]
    pub fn job_timeout(job: JobId, limit: Duration) -> Self {
        let mut fault = Self::new(FaultKind::JobTimeout);
        fault.job = Some(job);
        fault.limit = Some(limit);
        fault
    }

    /// Creates a job-cancelled fault carrying the job id.
    #[must_use]
    #[track_caller]
    pub fn job_cancelled(job: JobId) -> Self {
        let mut fault = Self::new(FaultKind::JobCancelled);
        fault.job = Some(job);
        fault
    }

    /// Creates a scheduler-level fault.
    #[must_use]
    #[track_caller]
    pub fn scheduler(ctx: impl Into<String>) -> Self {
        Self::new(FaultKind::Scheduler).with_context(ctx)
    }

    /// Creates an admission-refused fault for a full pending queue.
    #[must_use]
    #[track_caller]
    pub fn queue_full(capacity: usize) -> Self {
        Self::new(FaultKind::QueueFull).with_context(format!("pending queue at capacity {capacity}"))
    }

    /// Creates an aggregate fault from the per-input rejection reasons,
    /// preserved in input order.
    #[must_use]
    #[track_caller]
    pub fn aggregate(causes: Vec<Fault>) -> Self {
        let mut fault = Self::new(FaultKind::Aggregate);
        fault.causes = causes;
        fault
    }

    /// Creates an invalid-state fault (accessor misuse, closed scope).
    #[must_use]
    #[track_caller]
    pub fn invalid_state(ctx: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidState).with_context(ctx)
    }

    /// Creates the fault a deferred value rejects with when resolved with
    /// itself.
    #[must_use]
    #[track_caller]
    pub fn self_resolution() -> Self {
        Self::new(FaultKind::SelfResolution)
            .with_context("a deferred value cannot be resolved with itself")
    }

    /// Creates a user fault with a message.
    #[must_use]
    #[track_caller]
    pub fn user(ctx: impl Into<String>) -> Self {
        Self::new(FaultKind::User).with_context(ctx)
    }

    /// Wraps an arbitrary error as a user fault, keeping it as the source.
    #[must_use]
    #[track_caller]
    pub fn wrap(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let mut fault = Self::new(FaultKind::User).with_context(source.to_string());
        fault.source = Some(Arc::new(source));
        fault
    }

    /// Converts a caught panic payload into a fault.
    ///
    /// Extracts the conventional `&str` / `String` payloads; anything else
    /// becomes an opaque message.
    #[must_use]
    #[track_caller]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic payload of unknown type".to_string()
        };
        Self::new(FaultKind::Panicked).with_context(message)
    }

    /// Returns the fault kind.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the job this fault is attributed to, for the job kinds.
    #[must_use]
    pub const fn job(&self) -> Option<JobId> {
        self.job
    }

    /// Returns the exceeded limit for [`FaultKind::JobTimeout`].
    #[must_use]
    pub const fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Returns the per-input causes for [`FaultKind::Aggregate`].
    #[must_use]
    pub fn causes(&self) -> &[Fault] {
        &self.causes
    }

    /// Returns the construction site of this fault.
    #[must_use]
    pub const fn at(&self) -> &'static Location<'static> {
        self.at
    }

    /// Returns true if this fault represents cooperative cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, FaultKind::Cancelled | FaultKind::JobCancelled)
    }

    /// Returns true if this fault is a timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, FaultKind::Timeout | FaultKind::JobTimeout)
    }

    /// Returns true if this fault is specifically a job timeout.
    #[must_use]
    pub const fn is_job_timeout(&self) -> bool {
        matches!(self.kind, FaultKind::JobTimeout)
    }

    /// Adds deterministic context text to the fault.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if let Some(job) = self.job {
            write!(f, " [{job}]")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " after {limit:?}")?;
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if !self.causes.is_empty() {
            write!(f, " ({} causes)", self.causes.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Fault>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for deferval operations.
pub type Result<T> = core::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let fault = Fault::cancelled();
        assert_eq!(fault.to_string(), "cancelled");
    }

    #[test]
    fn display_with_context() {
        let fault = Fault::invalid_state("value read while pending");
        assert_eq!(
            fault.to_string(),
            "invalid state: value read while pending"
        );
    }

    #[test]
    fn display_job_timeout_carries_payload() {
        let fault = Fault::job_timeout(JobId::new(3), Duration::from_millis(10));
        assert_eq!(fault.job(), Some(JobId::new(3)));
        assert_eq!(fault.limit(), Some(Duration::from_millis(10)));
        assert!(fault.to_string().contains("job-3"));
        assert!(fault.to_string().contains("10ms"));
    }

    #[test]
    fn aggregate_preserves_cause_order() {
        let fault = Fault::aggregate(vec![Fault::user("a"), Fault::user("b")]);
        let contexts: Vec<_> = fault.causes().iter().map(|c| c.context().unwrap()).collect();
        assert_eq!(contexts, ["a", "b"]);
        assert!(fault.to_string().contains("2 causes"));
    }

    #[test]
    fn source_chain_is_exposed() {
        let fault = Fault::wrap(Underlying);
        let source = fault.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Fault::cancelled().is_cancellation());
        assert!(Fault::job_cancelled(JobId::new(1)).is_cancellation());
        assert!(!Fault::timeout().is_cancellation());

        assert!(Fault::timeout().is_timeout());
        assert!(Fault::job_timeout(JobId::new(1), Duration::ZERO).is_timeout());
        assert!(Fault::job_timeout(JobId::new(1), Duration::ZERO).is_job_timeout());
        assert!(!Fault::timeout().is_job_timeout());
    }

    #[test]
    fn from_panic_extracts_known_payloads() {
        let s: &(dyn Any + Send) = &"boom";
        assert_eq!(Fault::from_panic(s).context(), Some("boom"));

        let owned: &(dyn Any + Send) = &"owned boom".to_string();
        assert_eq!(Fault::from_panic(owned).context(), Some("owned boom"));

        let opaque: &(dyn Any + Send) = &42_u32;
        assert_eq!(
            Fault::from_panic(opaque).context(),
            Some("panic payload of unknown type")
        );
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Fault> = Err(Fault::timeout());
        let fault = res.context("fetch failed").expect_err("expected err");
        assert_eq!(fault.kind(), FaultKind::Timeout);
        assert_eq!(fault.to_string(), "timeout: fetch failed");
    }

    #[test]
    fn construction_site_is_captured() {
        let fault = Fault::cancelled();
        assert!(fault.at().file().ends_with("error.rs"));
    }
}
