//! Static constructors and combinators over deferred values.
//!
//! The combinators take their inputs eagerly and settle the returned value
//! according to the classical contract:
//!
//! - [`all`](DeferredValue::all): first rejection wins, otherwise the
//!   values in input order
//! - [`race`](DeferredValue::race): first settlement wins, either way
//! - [`all_settled`](DeferredValue::all_settled): never rejects
//! - [`any`](DeferredValue::any): first fulfillment wins, otherwise an
//!   aggregate fault carrying every reason in input order

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::error::Fault;
use crate::runtime::LoopHandle;

use super::state::Settled;
use super::step::Step;
use super::DeferredValue;

impl<T: Clone + 'static> DeferredValue<T> {
    /// Creates an already-fulfilled deferred value.
    #[must_use]
    #[track_caller]
    pub fn resolved(h: &LoopHandle, value: T) -> Self {
        let dv = Self::created(h);
        dv.complete_value(value);
        dv
    }

    /// Creates an already-rejected deferred value.
    #[must_use]
    #[track_caller]
    pub fn rejected(h: &LoopHandle, fault: Fault) -> Self {
        let dv = Self::created(h);
        dv.complete_fault(fault);
        dv
    }

    /// The general assimilating constructor: runs the full resolution
    /// procedure on `step`.
    ///
    /// Identity on deferred values: `from_step(Step::Pending(dv))` returns
    /// `dv` itself, not a wrapper. Plain values and faults settle
    /// immediately; thenables are adopted.
    #[must_use]
    #[track_caller]
    pub fn from_step(h: &LoopHandle, step: Step<T>) -> Self {
        match step {
            Step::Pending(dv) => dv,
            Step::Now(value) => Self::resolved(h, value),
            Step::Fault(fault) => Self::rejected(h, fault),
            Step::Chain(thenable) => {
                let dv = Self::created(h);
                dv.shared.borrow_mut().resolution_locked = true;
                dv.resolve_step(Step::Chain(thenable));
                dv
            }
        }
    }

    /// Fulfills with every input value in input order, or rejects with the
    /// first rejection reason. Empty input fulfills with an empty vector.
    #[must_use]
    #[track_caller]
    pub fn all(
        h: &LoopHandle,
        inputs: impl IntoIterator<Item = Self>,
    ) -> DeferredValue<Vec<T>> {
        let inputs: Vec<Self> = inputs.into_iter().collect();
        let out = DeferredValue::created(h);
        if inputs.is_empty() {
            out.complete_value(Vec::new());
            return out;
        }
        let slots: Rc<RefCell<Vec<Option<T>>>> =
            Rc::new(RefCell::new(inputs.iter().map(|_| None).collect()));
        let remaining = Rc::new(Cell::new(inputs.len()));
        for (i, input) in inputs.into_iter().enumerate() {
            let slots = Rc::clone(&slots);
            let remaining = Rc::clone(&remaining);
            let fulfill = out.clone();
            let reject = out.clone();
            input.subscribe(
                move |v| {
                    slots.borrow_mut()[i] = Some(v);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values: Vec<T> = slots
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.expect("every input delivered a value"))
                            .collect();
                        fulfill.complete_value(values);
                    }
                },
                move |f| {
                    reject.complete_fault(f);
                },
                true,
            );
        }
        out
    }

    /// Settles with the first settlement among the inputs, fulfillment or
    /// rejection alike. Empty input never settles.
    #[must_use]
    #[track_caller]
    pub fn race(h: &LoopHandle, inputs: impl IntoIterator<Item = Self>) -> Self {
        let out = Self::created(h);
        for input in inputs {
            let fulfill = out.clone();
            let reject = out.clone();
            input.subscribe(
                move |v| {
                    fulfill.complete_value(v);
                },
                move |f| {
                    reject.complete_fault(f);
                },
                true,
            );
        }
        out
    }

    /// Always fulfills, with one [`Settled`] descriptor per input in input
    /// order. Empty input fulfills with an empty vector.
    #[must_use]
    #[track_caller]
    pub fn all_settled(
        h: &LoopHandle,
        inputs: impl IntoIterator<Item = Self>,
    ) -> DeferredValue<Vec<Settled<T>>> {
        let inputs: Vec<Self> = inputs.into_iter().collect();
        let out = DeferredValue::created(h);
        if inputs.is_empty() {
            out.complete_value(Vec::new());
            return out;
        }
        let slots: Rc<RefCell<Vec<Option<Settled<T>>>>> =
            Rc::new(RefCell::new(inputs.iter().map(|_| None).collect()));
        let remaining = Rc::new(Cell::new(inputs.len()));
        for (i, input) in inputs.into_iter().enumerate() {
            let record = {
                let slots = Rc::clone(&slots);
                let remaining = Rc::clone(&remaining);
                let out = out.clone();
                move |outcome: Settled<T>| {
                    slots.borrow_mut()[i] = Some(outcome);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let outcomes: Vec<Settled<T>> = slots
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.expect("every input settled"))
                            .collect();
                        out.complete_value(outcomes);
                    }
                }
            };
            let record = Rc::new(RefCell::new(Some(record)));
            let on_fulfilled = {
                let record = Rc::clone(&record);
                move |v: T| {
                    if let Some(record) = record.borrow_mut().take() {
                        record(Settled::Fulfilled(v));
                    }
                }
            };
            let on_rejected = {
                let record = Rc::clone(&record);
                move |f: Fault| {
                    if let Some(record) = record.borrow_mut().take() {
                        record(Settled::Rejected(f));
                    }
                }
            };
            input.subscribe(on_fulfilled, on_rejected, true);
        }
        out
    }

    /// Fulfills with the first fulfillment; rejects with an aggregate fault
    /// carrying every rejection reason in input order once all inputs have
    /// rejected. Empty input rejects with an empty aggregate.
    #[must_use]
    #[track_caller]
    pub fn any(h: &LoopHandle, inputs: impl IntoIterator<Item = Self>) -> Self {
        let inputs: Vec<Self> = inputs.into_iter().collect();
        let out = Self::created(h);
        if inputs.is_empty() {
            out.complete_fault(Fault::aggregate(Vec::new()).with_context("no inputs to any"));
            return out;
        }
        let faults: Rc<RefCell<Vec<Option<Fault>>>> =
            Rc::new(RefCell::new(inputs.iter().map(|_| None).collect()));
        let rejected_remaining = Rc::new(Cell::new(inputs.len()));
        for (i, input) in inputs.into_iter().enumerate() {
            let faults = Rc::clone(&faults);
            let rejected_remaining = Rc::clone(&rejected_remaining);
            let fulfill = out.clone();
            let reject = out.clone();
            input.subscribe(
                move |v| {
                    fulfill.complete_value(v);
                },
                move |f| {
                    faults.borrow_mut()[i] = Some(f);
                    rejected_remaining.set(rejected_remaining.get() - 1);
                    if rejected_remaining.get() == 0 {
                        let causes: Vec<Fault> = faults
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.expect("every input rejected"))
                            .collect();
                        reject.complete_fault(
                            Fault::aggregate(causes).with_context("all inputs rejected"),
                        );
                    }
                },
                true,
            );
        }
        out
    }

    /// Static form of the [`timeout`](Self::timeout) decorator.
    #[must_use]
    #[track_caller]
    pub fn with_timeout(dv: &Self, after: Duration) -> Self {
        dv.timeout(after)
    }
}
