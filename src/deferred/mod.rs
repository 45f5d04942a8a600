//! The deferred-value abstraction.
//!
//! A [`DeferredValue`] is a single-assignment container for an eventually
//! known value or fault. It settles exactly once, composes by chaining,
//! and extends the classical deferred-value contract with timeouts,
//! cooperative cancellation, progress notification, observable state, and
//! settlement hooks, without violating that contract:
//!
//! - **Thenable assimilation**: resolving with anything implementing
//!   [`Thenable`] adopts that value's first delivery (see [`Step`]).
//! - **Run-to-completion**: handler dispatch is always deferred through the
//!   loop's dispatch policy, even when the value is already settled at
//!   registration time. A handler never observes partial settlement.
//! - **At-most-once**: state transitions once; every registered handler is
//!   invoked at most once; handlers on one value run in registration order.
//!
//! Settle hooks are the exception to deferral: they run synchronously at
//! settlement (before any chained continuation executes) and their panics
//! are logged and swallowed; hooks can observe but never affect the value.
//!
//! Handles are cheap clones sharing one underlying slot; everything is
//! single-threaded and `!Send`, owned by the loop the constructor was
//! given.

pub mod combinator;
mod completer;
pub mod scope;
mod state;
mod step;
mod timeout;

pub use completer::{CancelHandle, Completer};
pub use scope::ScopeHandle;
pub use state::{DvState, Settled, SettleTrace};
pub use step::{Step, Thenable};

use core::fmt;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe, Location};
use std::rc::Rc;

use crate::error::{Fault, Result};
use crate::observability::LogEntry;
use crate::runtime::LoopHandle;

use step::guard_step;

struct DvShared<T> {
    outcome: Option<Settled<T>>,
    /// Flips on the first accepted resolve/reject, including the start of
    /// a thenable adoption. Internal deliveries bypass it; user-facing
    /// completers consult it under the loop's settle policy.
    resolution_locked: bool,
    cancelable: bool,
    rejection_handled: bool,
    on_fulfilled: VecDeque<Box<dyn FnOnce(T)>>,
    on_rejected: VecDeque<Box<dyn FnOnce(Fault)>>,
    settle_hooks: VecDeque<Box<dyn FnOnce(&Settled<T>)>>,
    progress_buf: VecDeque<f64>,
    progress_dropped: u64,
    progress_subs: Vec<Rc<RefCell<dyn FnMut(f64)>>>,
    created_at: &'static Location<'static>,
    rejected_at: Option<&'static Location<'static>>,
}

/// A single-assignment deferred value on a cooperative event loop.
///
/// See the [module docs](self) for the contract. Constructors take the
/// [`LoopHandle`] of the loop that owns dispatch; all handles to one value
/// share state, so cloning is cheap and `Clone` is how a value is passed
/// to multiple consumers.
pub struct DeferredValue<T> {
    shared: Rc<RefCell<DvShared<T>>>,
    h: LoopHandle,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            h: self.h.clone(),
        }
    }
}

impl<T: Clone + 'static> DeferredValue<T> {
    #[track_caller]
    pub(crate) fn created(h: &LoopHandle) -> Self {
        Self {
            shared: Rc::new(RefCell::new(DvShared {
                outcome: None,
                resolution_locked: false,
                cancelable: false,
                rejection_handled: false,
                on_fulfilled: VecDeque::new(),
                on_rejected: VecDeque::new(),
                settle_hooks: VecDeque::new(),
                progress_buf: VecDeque::new(),
                progress_dropped: 0,
                progress_subs: Vec::new(),
                created_at: Location::caller(),
                rejected_at: None,
            })),
            h: h.clone(),
        }
    }

    /// Creates a deferred value, invoking `executor` synchronously with its
    /// [`Completer`].
    ///
    /// A panic raised by the executor rejects the value, unless the
    /// executor already resolved it.
    #[track_caller]
    pub fn new(h: &LoopHandle, executor: impl FnOnce(Completer<T>)) -> Self {
        let dv = Self::created(h);
        dv.run_executor(executor);
        dv
    }

    /// Creates a pending deferred value and its completer, without an
    /// executor.
    #[track_caller]
    pub fn pending(h: &LoopHandle) -> (Self, Completer<T>) {
        let dv = Self::created(h);
        let completer = Completer::new(dv.clone());
        (dv, completer)
    }

    /// Creates a cancelable deferred value.
    ///
    /// The returned [`CancelHandle`] (and [`cancel`](Self::cancel) on the
    /// value itself) rejects with a cancellation fault if and only if the
    /// value is still pending. Cancellation is cooperative: work inside the
    /// executor keeps running unless it observes the rejection through a
    /// hook and releases its resources.
    #[track_caller]
    pub fn cancellable(h: &LoopHandle, executor: impl FnOnce(Completer<T>)) -> (Self, CancelHandle) {
        let dv = Self::created(h);
        dv.shared.borrow_mut().cancelable = true;
        dv.run_executor(executor);
        let target = dv.clone();
        let handle = CancelHandle::new(Rc::new(move |fault| target.cancel_with(fault)));
        (dv, handle)
    }

    fn run_executor(&self, executor: impl FnOnce(Completer<T>)) {
        let completer = Completer::new(self.clone());
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| executor(completer))) {
            let fault = Fault::from_panic(payload.as_ref());
            let fresh = {
                let mut s = self.shared.borrow_mut();
                let fresh = !s.resolution_locked;
                s.resolution_locked = true;
                fresh
            };
            // A throw after resolve is ignored, like the interop contract
            // requires.
            if fresh {
                self.complete_fault(fault);
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DvState {
        match &self.shared.borrow().outcome {
            None => DvState::Pending,
            Some(outcome) => outcome.state(),
        }
    }

    /// Returns true once settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.borrow().outcome.is_some()
    }

    /// Returns the fulfillment value.
    ///
    /// Fails with an invalid-state fault unless fulfilled.
    pub fn value(&self) -> Result<T> {
        match &self.shared.borrow().outcome {
            Some(Settled::Fulfilled(v)) => Ok(v.clone()),
            _ => Err(Fault::invalid_state("value read while not fulfilled")),
        }
    }

    /// Returns the rejection fault.
    ///
    /// Fails with an invalid-state fault unless rejected.
    pub fn reason(&self) -> Result<Fault> {
        match &self.shared.borrow().outcome {
            Some(Settled::Rejected(f)) => Ok(f.clone()),
            _ => Err(Fault::invalid_state("reason read while not rejected")),
        }
    }

    /// Returns the creation site, plus the rejection site once rejected.
    #[must_use]
    pub fn trace(&self) -> SettleTrace {
        let s = self.shared.borrow();
        SettleTrace::new(s.created_at, s.rejected_at)
    }

    // =========================================================================
    // Chaining
    // =========================================================================

    /// Chains a fulfillment handler; rejections pass through unchanged.
    ///
    /// The handler runs asynchronously (one dispatch tick after source
    /// settlement at the earliest), at most once, with the settled value.
    /// Its returned [`Step`] resolves the returned deferred value; a panic
    /// rejects it.
    #[track_caller]
    pub fn then<U, F>(&self, on_fulfilled: F) -> DeferredValue<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Step<U> + 'static,
    {
        let child = DeferredValue::created(&self.h);
        let fulfill = child.clone();
        let reject = child.clone();
        self.subscribe(
            move |v| fulfill.resolve_step(guard_step(|| on_fulfilled(v))),
            move |f| {
                reject.complete_fault(f);
            },
            true,
        );
        child
    }

    /// Chains a rejection handler; fulfillments pass through unchanged.
    #[track_caller]
    pub fn catch<F>(&self, on_rejected: F) -> DeferredValue<T>
    where
        F: FnOnce(Fault) -> Step<T> + 'static,
    {
        let child = DeferredValue::created(&self.h);
        let fulfill = child.clone();
        let reject = child.clone();
        self.subscribe(
            move |v| {
                fulfill.complete_value(v);
            },
            move |f| reject.resolve_step(guard_step(|| on_rejected(f))),
            true,
        );
        child
    }

    /// Chains both handlers at once.
    #[track_caller]
    pub fn then_catch<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> DeferredValue<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Step<U> + 'static,
        G: FnOnce(Fault) -> Step<U> + 'static,
    {
        let child = DeferredValue::created(&self.h);
        let fulfill = child.clone();
        let reject = child.clone();
        self.subscribe(
            move |v| fulfill.resolve_step(guard_step(|| on_fulfilled(v))),
            move |f| reject.resolve_step(guard_step(|| on_rejected(f))),
            true,
        );
        child
    }

    /// Runs `finalizer` on either outcome, awaits its returned step, and
    /// re-emits the original outcome, unless the finalizer faults, in
    /// which case that fault wins.
    #[track_caller]
    pub fn finally<F>(&self, finalizer: F) -> DeferredValue<T>
    where
        F: FnOnce() -> Step<()> + 'static,
    {
        let child = DeferredValue::created(&self.h);
        let h = self.h.clone();
        let finalizer = Rc::new(RefCell::new(Some(finalizer)));
        let fin2 = Rc::clone(&finalizer);
        let h2 = h.clone();
        let fulfill = child.clone();
        let reject = child.clone();
        self.subscribe(
            move |v| {
                let step = run_finalizer(&finalizer);
                let gate = DeferredValue::<()>::from_step(&h, step);
                let emit = fulfill.clone();
                let fail = fulfill;
                gate.subscribe(
                    move |()| {
                        emit.complete_value(v);
                    },
                    move |fault| {
                        fail.complete_fault(fault);
                    },
                    true,
                );
            },
            move |original| {
                let step = run_finalizer(&fin2);
                let gate = DeferredValue::<()>::from_step(&h2, step);
                let emit = reject.clone();
                let fail = reject;
                gate.subscribe(
                    move |()| {
                        emit.complete_fault(original);
                    },
                    move |fault| {
                        fail.complete_fault(fault);
                    },
                    true,
                );
            },
            true,
        );
        child
    }

    // =========================================================================
    // Hooks and progress
    // =========================================================================

    /// Registers a settlement hook.
    ///
    /// Hooks receive the outcome on either branch. They fire synchronously
    /// at settlement, before chained continuations run; when the value is
    /// already settled the hook runs synchronously right here. Hook panics
    /// are logged and swallowed; a hook never affects the value.
    pub fn on_settle(&self, hook: impl FnOnce(&Settled<T>) + 'static) {
        let outcome = {
            let mut s = self.shared.borrow_mut();
            match &s.outcome {
                None => {
                    s.settle_hooks.push_back(Box::new(hook));
                    return;
                }
                Some(outcome) => outcome.clone(),
            }
        };
        run_swallow(&self.h, "settle hook", move || hook(&outcome));
    }

    /// Subscribes to progress.
    ///
    /// The subscriber first replays every progress value buffered while
    /// pending, in emission order, then receives subsequent emissions.
    /// Subscribers registered after settlement receive nothing. Subscriber
    /// panics are logged and swallowed. Delivery is deferred through the
    /// loop like any other handler dispatch.
    pub fn progress_subscribe(&self, subscriber: impl FnMut(f64) + 'static) {
        let (cell, replay) = {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() {
                return;
            }
            let cell: Rc<RefCell<dyn FnMut(f64)>> = Rc::new(RefCell::new(subscriber));
            s.progress_subs.push(Rc::clone(&cell));
            let replay: Vec<f64> = s.progress_buf.iter().copied().collect();
            (cell, replay)
        };
        if !replay.is_empty() {
            let h = self.h.clone();
            self.h.defer(move || {
                for value in replay {
                    deliver_progress(&h, &cell, value);
                }
            });
        }
    }

    pub(crate) fn push_progress(&self, value: f64) -> bool {
        let subs = {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() {
                return false;
            }
            let cap = self.h.progress_capacity();
            if cap > 0 {
                if s.progress_buf.len() >= cap {
                    s.progress_buf.pop_front();
                    s.progress_dropped += 1;
                    self.h.log(
                        LogEntry::debug("progress value dropped: replay buffer full")
                            .with_field("capacity", cap.to_string())
                            .with_field("dropped", s.progress_dropped.to_string()),
                    );
                }
                s.progress_buf.push_back(value);
            }
            s.progress_subs.clone()
        };
        if !subs.is_empty() {
            let h = self.h.clone();
            self.h.defer(move || {
                for cell in &subs {
                    deliver_progress(&h, cell, value);
                }
            });
        }
        true
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels with the default cancellation fault.
    ///
    /// Returns true iff this value is cancelable and was still pending.
    /// On a non-cancelable value this returns false with no side effect.
    pub fn cancel(&self) -> bool {
        self.cancel_with(Fault::cancelled())
    }

    /// Cancels with a specific fault.
    pub fn cancel_with(&self, fault: Fault) -> bool {
        {
            let s = self.shared.borrow();
            if !s.cancelable || s.outcome.is_some() {
                return false;
            }
        }
        // Cancellation bypasses the resolution lock: a value waiting on an
        // adopted thenable is still pending and may be cancelled; the
        // thenable's late delivery is then dropped.
        self.complete_fault(fault)
    }

    // =========================================================================
    // Internal machinery
    // =========================================================================

    /// Registers raw continuations on the two FIFO queues.
    ///
    /// `observes_rejection` marks the rejection branch as handled for the
    /// unhandled-rejection probe.
    pub(crate) fn subscribe(
        &self,
        on_fulfilled: impl FnOnce(T) + 'static,
        on_rejected: impl FnOnce(Fault) + 'static,
        observes_rejection: bool,
    ) {
        let outcome = {
            let mut s = self.shared.borrow_mut();
            if observes_rejection {
                s.rejection_handled = true;
            }
            match &s.outcome {
                None => {
                    s.on_fulfilled.push_back(Box::new(on_fulfilled));
                    s.on_rejected.push_back(Box::new(on_rejected));
                    return;
                }
                Some(outcome) => outcome.clone(),
            }
        };
        // Dispatch is asynchronous even when already settled.
        match outcome {
            Settled::Fulfilled(v) => self.h.defer(move || on_fulfilled(v)),
            Settled::Rejected(f) => self.h.defer(move || on_rejected(f)),
        }
    }

    /// Applies the settle policy to a user-facing settlement attempt.
    ///
    /// Returns true if the caller acquired the resolution lock.
    pub(crate) fn lock_for_settle(&self, op: &'static str) -> bool {
        let created_at = {
            let mut s = self.shared.borrow_mut();
            if !s.resolution_locked {
                s.resolution_locked = true;
                return true;
            }
            s.created_at
        };
        match self.h.settle_policy() {
            crate::runtime::SettlePolicy::Strict => {
                panic!("double settle: {op} on a deferred value created at {created_at}")
            }
            crate::runtime::SettlePolicy::Warn => {
                self.h.log(
                    LogEntry::warn("double settle ignored")
                        .with_field("op", op)
                        .with_field("created_at", created_at.to_string()),
                );
            }
        }
        false
    }

    /// The resolution procedure. The caller must hold the resolution lock
    /// (or be an internal delivery path).
    pub(crate) fn resolve_step(&self, step: Step<T>) {
        match step {
            Step::Now(v) => {
                self.complete_value(v);
            }
            Step::Fault(f) => {
                self.complete_fault(f);
            }
            Step::Pending(dv) => {
                if Rc::ptr_eq(&self.shared, &dv.shared) {
                    self.complete_fault(Fault::self_resolution());
                } else {
                    self.adopt(Box::new(dv));
                }
            }
            Step::Chain(thenable) => self.adopt(thenable),
        }
    }

    /// Adopts a thenable: one deferred job invokes its subscription; the
    /// first delivery across the callback pair decides this value's
    /// outcome; a panic from the subscription rejects unless a delivery
    /// already landed.
    fn adopt(&self, thenable: Box<dyn Thenable<T>>) {
        let target = self.clone();
        self.h.enqueue_micro(move || {
            let called = Rc::new(Cell::new(false));
            let on_fulfilled: Box<dyn FnOnce(Step<T>)> = {
                let called = Rc::clone(&called);
                let target = target.clone();
                Box::new(move |step| {
                    if !called.replace(true) {
                        target.resolve_step(step);
                    }
                })
            };
            let on_rejected: Box<dyn FnOnce(Fault)> = {
                let called = Rc::clone(&called);
                let target = target.clone();
                Box::new(move |fault| {
                    if !called.replace(true) {
                        target.complete_fault(fault);
                    }
                })
            };
            if let Err(payload) =
                catch_unwind(AssertUnwindSafe(|| thenable.subscribe(on_fulfilled, on_rejected)))
            {
                if !called.replace(true) {
                    target.complete_fault(Fault::from_panic(payload.as_ref()));
                }
            }
        });
    }

    /// Fulfills, ignoring the attempt once settled. Internal delivery path.
    pub(crate) fn complete_value(&self, value: T) -> bool {
        self.do_settle(Settled::Fulfilled(value))
    }

    /// Rejects, ignoring the attempt once settled. Internal delivery path.
    pub(crate) fn complete_fault(&self, fault: Fault) -> bool {
        self.do_settle(Settled::Rejected(fault))
    }

    fn do_settle(&self, outcome: Settled<T>) -> bool {
        let (hooks, fulfilled_q, rejected_q) = {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() {
                return false;
            }
            s.resolution_locked = true;
            if let Settled::Rejected(f) = &outcome {
                s.rejected_at = Some(f.at());
            }
            s.outcome = Some(outcome.clone());
            // The progress channel dies at settlement.
            s.progress_subs.clear();
            s.progress_buf.clear();
            (
                std::mem::take(&mut s.settle_hooks),
                std::mem::take(&mut s.on_fulfilled),
                std::mem::take(&mut s.on_rejected),
            )
        };

        // Queue the chain continuations first; they are deferred, so the
        // synchronous hooks below still observe settlement before any
        // continuation executes.
        match &outcome {
            Settled::Fulfilled(v) => {
                drop(rejected_q);
                for cb in fulfilled_q {
                    let v = v.clone();
                    self.h.defer(move || cb(v));
                }
            }
            Settled::Rejected(f) => {
                drop(fulfilled_q);
                for cb in rejected_q {
                    let f = f.clone();
                    self.h.defer(move || cb(f));
                }
            }
        }

        for hook in hooks {
            run_swallow(&self.h, "settle hook", || hook(&outcome));
        }

        if let Settled::Rejected(fault) = &outcome {
            self.arm_unhandled_probe(fault);
        }
        true
    }

    /// One tick after a rejection, warn if still nothing observes it.
    fn arm_unhandled_probe(&self, fault: &Fault) {
        if self.shared.borrow().rejection_handled {
            return;
        }
        let shared = Rc::clone(&self.shared);
        let h = self.h.clone();
        let fault = fault.clone();
        self.h.enqueue_micro(move || {
            let s = shared.borrow();
            if !s.rejection_handled {
                h.log(
                    LogEntry::warn("unhandled rejection")
                        .with_field("fault", fault.to_string())
                        .with_field("created_at", s.created_at.to_string()),
                );
            }
        });
    }
}

impl<T: Clone + 'static> Thenable<T> for DeferredValue<T> {
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(Step<T>)>,
        on_rejected: Box<dyn FnOnce(Fault)>,
    ) {
        DeferredValue::subscribe(&self, move |v| on_fulfilled(Step::Now(v)), on_rejected, true);
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.borrow();
        let state = match &s.outcome {
            None => DvState::Pending,
            Some(outcome) => outcome.state(),
        };
        f.debug_struct("DeferredValue")
            .field("state", &state)
            .field("created_at", &s.created_at)
            .finish()
    }
}

fn run_swallow(h: &LoopHandle, what: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let fault = Fault::from_panic(payload.as_ref());
        h.log(
            LogEntry::warn("callback panicked; swallowed")
                .with_field("callback", what)
                .with_field("fault", fault.to_string()),
        );
    }
}

fn deliver_progress(h: &LoopHandle, cell: &Rc<RefCell<dyn FnMut(f64)>>, value: f64) {
    let cell = Rc::clone(cell);
    run_swallow(h, "progress subscriber", move || {
        (&mut *cell.borrow_mut())(value);
    });
}

fn run_finalizer<F: FnOnce() -> Step<()>>(slot: &Rc<RefCell<Option<F>>>) -> Step<()> {
    match slot.borrow_mut().take() {
        Some(f) => guard_step(f),
        None => Step::Now(()),
    }
}
