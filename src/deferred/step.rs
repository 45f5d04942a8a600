//! The resolution operand and the thenable protocol.
//!
//! Resolving a deferred value, and returning from a `then` handler, both
//! take a [`Step`]: a plain value, another deferred value, an arbitrary
//! [`Thenable`], or a fault. This is the statically-typed rendering of the
//! dynamic "is it a thenable?" capability test: anything that can deliver a
//! settlement through a two-callback subscription participates in
//! assimilation, without being a `DeferredValue` itself.

use core::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::Fault;

use super::DeferredValue;

/// What a resolution receives, and what a handler returns.
pub enum Step<T> {
    /// A plain value: fulfill with it.
    Now(T),
    /// Another deferred value: adopt its eventual outcome.
    Pending(DeferredValue<T>),
    /// An arbitrary thenable: adopt its first delivery.
    Chain(Box<dyn Thenable<T>>),
    /// A fault: reject with it.
    Fault(Fault),
}

impl<T> Step<T> {
    /// Wraps a plain value.
    #[must_use]
    pub fn now(value: T) -> Self {
        Self::Now(value)
    }

    /// Wraps a thenable.
    #[must_use]
    pub fn chain(thenable: impl Thenable<T> + 'static) -> Self {
        Self::Chain(Box::new(thenable))
    }

    /// Wraps a fault.
    #[must_use]
    pub fn fault(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl<T> From<DeferredValue<T>> for Step<T> {
    fn from(dv: DeferredValue<T>) -> Self {
        Self::Pending(dv)
    }
}

impl<T> From<Fault> for Step<T> {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl<T> From<crate::error::Result<T>> for Step<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(v) => Self::Now(v),
            Err(f) => Self::Fault(f),
        }
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now(_) => f.write_str("Step::Now(..)"),
            Self::Pending(_) => f.write_str("Step::Pending(..)"),
            Self::Chain(_) => f.write_str("Step::Chain(..)"),
            Self::Fault(fault) => write!(f, "Step::Fault({fault})"),
        }
    }
}

/// A value that can deliver a settlement through two callbacks.
///
/// This is the interop seam of the deferred-value protocol. Implementors
/// must call `on_fulfilled` or `on_rejected` to deliver their outcome; the
/// adopting deferred value uses only the first delivery across the pair,
/// so a malformed implementor that invokes both cannot corrupt state.
/// `on_fulfilled` receives a further [`Step`], so a thenable may itself
/// deliver another thenable and assimilation recurses.
///
/// [`DeferredValue`] implements this trait, which is what makes
/// `Step::Pending` and `Step::Chain` converge on one adoption path.
pub trait Thenable<T> {
    /// Subscribes the pair of delivery callbacks.
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(Step<T>)>,
        on_rejected: Box<dyn FnOnce(Fault)>,
    );
}

/// Runs a step-producing closure, converting a panic into `Step::Fault`.
pub(crate) fn guard_step<U>(f: impl FnOnce() -> Step<U>) -> Step<U> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(step) => step,
        Err(payload) => Step::Fault(Fault::from_panic(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result_maps_both_arms() {
        let ok: Step<i32> = Ok(5).into();
        assert!(matches!(ok, Step::Now(5)));

        let err: Step<i32> = Err::<i32, _>(Fault::timeout()).into();
        assert!(matches!(err, Step::Fault(_)));
    }

    #[test]
    fn guard_step_converts_panics() {
        let step: Step<i32> = guard_step(|| panic!("kaboom"));
        match step {
            Step::Fault(fault) => {
                assert_eq!(fault.kind(), crate::FaultKind::Panicked);
                assert_eq!(fault.context(), Some("kaboom"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn guard_step_passes_values_through() {
        let step: Step<i32> = guard_step(|| Step::now(9));
        assert!(matches!(step, Step::Now(9)));
    }
}
