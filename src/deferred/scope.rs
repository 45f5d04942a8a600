//! Structured scopes: a cooperative sub-region of related work.
//!
//! [`DeferredValue::scope`] runs a task body with a [`ScopeHandle`] through
//! which it registers child deferred values. The scope enforces a fail-fast
//! policy over its children:
//!
//! 1. the first child rejection fails the scope, cancels every
//!    still-pending cancelable sibling, and closes admission;
//! 2. a fault from the task body itself does the same;
//! 3. otherwise the scope waits for every child to settle and fulfills
//!    with the task body's value;
//! 4. `add` after the task body has returned yields an immediately
//!    rejected value.
//!
//! Fanout cancellation already attaches an observer to each child, so a
//! cancelled sibling's rejection never surfaces as an unhandled-rejection
//! warning.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Fault;
use crate::runtime::LoopHandle;

use super::step::{guard_step, Step};
use super::DeferredValue;

struct ScopeState {
    closed: bool,
    failed: bool,
    task_done: bool,
    open_children: usize,
    cancels: Vec<Box<dyn Fn()>>,
}

/// Handle passed to a scope's task body for registering children.
///
/// Clonable so work started inside the scope can keep admitting follow-up
/// children from its own callbacks while the scope is open.
pub struct ScopeHandle {
    h: LoopHandle,
    state: Rc<RefCell<ScopeState>>,
    child_done: Rc<dyn Fn(Option<Fault>)>,
}

impl Clone for ScopeHandle {
    fn clone(&self) -> Self {
        Self {
            h: self.h.clone(),
            state: Rc::clone(&self.state),
            child_done: Rc::clone(&self.child_done),
        }
    }
}

impl ScopeHandle {
    /// The loop handle, for constructing work inside the task body.
    #[must_use]
    pub fn handle(&self) -> &LoopHandle {
        &self.h
    }

    /// Registers `work` as a child of the scope and returns it for further
    /// chaining.
    ///
    /// Fails fast: once the scope has failed or the task body has
    /// returned, the child is not registered and an immediately rejected
    /// value is returned instead.
    #[track_caller]
    pub fn add<U: Clone + 'static>(&self, work: DeferredValue<U>) -> DeferredValue<U> {
        {
            let state = self.state.borrow();
            if state.failed {
                return DeferredValue::rejected(&self.h, Fault::invalid_state("scope already failed"));
            }
            if state.closed {
                return DeferredValue::rejected(
                    &self.h,
                    Fault::invalid_state("scope task already completed"),
                );
            }
        }
        {
            let mut state = self.state.borrow_mut();
            state.open_children += 1;
            let target = work.clone();
            state.cancels.push(Box::new(move || {
                let _ = target
                    .cancel_with(Fault::cancelled().with_context("scope cancelled: sibling failed"));
            }));
        }
        let settled = Rc::clone(&self.child_done);
        let rejected = Rc::clone(&self.child_done);
        work.subscribe(
            move |_v| settled(None),
            move |fault| rejected(Some(fault)),
            true,
        );
        work
    }

    /// Evaluates `thunk` and registers the produced work.
    ///
    /// A panic inside the thunk registers an already-rejected child, which
    /// fails the scope like any other child rejection.
    #[track_caller]
    pub fn add_with<U: Clone + 'static>(
        &self,
        thunk: impl FnOnce() -> DeferredValue<U>,
    ) -> DeferredValue<U> {
        {
            let state = self.state.borrow();
            if state.failed || state.closed {
                // Reuse the fail-fast paths of `add` without running the thunk.
                return self.add(DeferredValue::created(&self.h));
            }
        }
        let step = guard_step(|| Step::Pending(thunk()));
        self.add(DeferredValue::from_step(&self.h, step))
    }
}

impl<T: Clone + 'static> DeferredValue<T> {
    /// Runs `task` inside a structured scope; see the module docs for the
    /// fail-fast child policy.
    #[track_caller]
    pub fn scope<F>(h: &LoopHandle, task: F) -> Self
    where
        F: FnOnce(&ScopeHandle) -> Step<T>,
    {
        let outer = Self::created(h);
        let state = Rc::new(RefCell::new(ScopeState {
            closed: false,
            failed: false,
            task_done: false,
            open_children: 0,
            cancels: Vec::new(),
        }));
        let task_value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

        let finish: Rc<dyn Fn()> = {
            let state = Rc::clone(&state);
            let task_value = Rc::clone(&task_value);
            let outer = outer.clone();
            Rc::new(move || {
                let ready = {
                    let s = state.borrow();
                    s.task_done && !s.failed && s.open_children == 0
                };
                if ready {
                    if let Some(value) = task_value.borrow_mut().take() {
                        outer.complete_value(value);
                    }
                }
            })
        };

        let fail: Rc<dyn Fn(Fault)> = {
            let state = Rc::clone(&state);
            let outer = outer.clone();
            Rc::new(move |fault: Fault| {
                let cancels = {
                    let mut s = state.borrow_mut();
                    if s.failed {
                        return;
                    }
                    s.failed = true;
                    std::mem::take(&mut s.cancels)
                };
                for cancel in cancels {
                    cancel();
                }
                outer.complete_fault(fault);
            })
        };

        let child_done: Rc<dyn Fn(Option<Fault>)> = {
            let state = Rc::clone(&state);
            let finish = Rc::clone(&finish);
            let fail = Rc::clone(&fail);
            Rc::new(move |fault: Option<Fault>| {
                state.borrow_mut().open_children -= 1;
                match fault {
                    Some(fault) => fail(fault),
                    None => finish(),
                }
            })
        };

        let scope = ScopeHandle {
            h: h.clone(),
            state: Rc::clone(&state),
            child_done,
        };

        let step = guard_step(|| task(&scope));
        state.borrow_mut().closed = true;

        let task_dv = Self::from_step(h, step);
        let on_done = {
            let state = Rc::clone(&state);
            let task_value = Rc::clone(&task_value);
            let finish = Rc::clone(&finish);
            move |value: T| {
                *task_value.borrow_mut() = Some(value);
                state.borrow_mut().task_done = true;
                finish();
            }
        };
        let on_fault = move |fault: Fault| fail(fault);
        task_dv.subscribe(on_done, on_fault, true);

        outer
    }
}
