//! Settlement and cancellation handles.

use core::fmt;
use std::rc::Rc;

use crate::error::Fault;

use super::step::Step;
use super::DeferredValue;

/// The settlement side of a deferred value.
///
/// An executor receives one of these; it exposes the three callbacks of the
/// construction contract: resolve, reject, progress. Completers are `Clone`
/// so an executor can hand them to timers or other callbacks, but only the
/// first accepted resolve/reject takes effect; later attempts follow the
/// loop's [`SettlePolicy`](crate::runtime::SettlePolicy) (warn by default,
/// panic in strict mode) and report whether they took effect through the
/// return value.
pub struct Completer<T> {
    dv: DeferredValue<T>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            dv: self.dv.clone(),
        }
    }
}

impl<T: Clone + 'static> Completer<T> {
    pub(crate) fn new(dv: DeferredValue<T>) -> Self {
        Self { dv }
    }

    /// Resolves with a plain value. Returns false if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        self.resolve_step(Step::Now(value))
    }

    /// Runs the full resolution procedure on `step`: plain values fulfill,
    /// faults reject, deferred values and thenables are adopted (their
    /// first delivery decides the outcome). Returns false if already
    /// resolved.
    pub fn resolve_step(&self, step: Step<T>) -> bool {
        if !self.dv.lock_for_settle("resolve") {
            return false;
        }
        self.dv.resolve_step(step);
        true
    }

    /// Rejects with a fault. Returns false if already resolved.
    pub fn reject(&self, fault: Fault) -> bool {
        if !self.dv.lock_for_settle("reject") {
            return false;
        }
        self.dv.complete_fault(fault);
        true
    }

    /// Emits a progress value. Returns false once the value has settled;
    /// post-settlement emissions are dropped.
    pub fn progress(&self, value: f64) -> bool {
        self.dv.push_progress(value)
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completer(..)")
    }
}

/// Cancels a cancelable deferred value.
///
/// Returned by [`DeferredValue::cancellable`]; type-erased so schedulers
/// and scopes can hold cancellation capabilities for heterogeneous values.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Rc<dyn Fn(Fault) -> bool>,
}

impl CancelHandle {
    pub(crate) fn new(inner: Rc<dyn Fn(Fault) -> bool>) -> Self {
        Self { inner }
    }

    /// Cancels with the default cancellation fault.
    ///
    /// Returns true iff the value was still pending and is now rejected.
    pub fn cancel(&self) -> bool {
        (self.inner)(Fault::cancelled())
    }

    /// Cancels with a specific fault.
    pub fn cancel_with(&self, fault: Fault) -> bool {
        (self.inner)(fault)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle(..)")
    }
}
