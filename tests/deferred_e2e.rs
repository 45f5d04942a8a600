//! Deferred-value E2E suite.
//!
//! Exercises the settlement contract end to end on a real loop:
//! - chaining and assimilation across multiple ticks
//! - run-to-completion of handler dispatch
//! - settlement hooks, progress replay, cancellation
//! - the timeout decorator against the virtual clock

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use deferval::{
    Completer, DeferredValue, DvState, EventLoop, Fault, FaultKind, RuntimeConfig, SettlePolicy,
    Step,
};

/// A fulfilled value chains through a transformation.
#[test]
fn basic_chain_transforms_value() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let out = DeferredValue::new(&h, |c: Completer<i32>| {
        c.resolve(1);
    })
    .then(|v| Step::now(v + 1));

    lp.run_until_idle();
    assert_eq!(out.value().unwrap(), 2);
}

/// Handlers may return pending work; the chain settles when it does.
#[test]
fn chain_awaits_returned_deferred() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let timer = h.clone();
    let out = DeferredValue::resolved(&h, 3)
        .then(move |v| Step::Pending(timer.after_value(Duration::from_millis(10), v * 10)))
        .then(|v| Step::now(v + 1));

    lp.run_until_idle();
    assert_eq!(out.value().unwrap(), 31);
    assert_eq!(lp.now().as_millis(), 10);
}

/// A handler fault rejects the chained value; `catch` recovers it.
#[test]
fn catch_recovers_handler_fault() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let out = DeferredValue::resolved(&h, 1)
        .then(|_v| Step::<i32>::fault(Fault::user("midway")))
        .catch(|fault| {
            assert_eq!(fault.context(), Some("midway"));
            Step::now(-1)
        });

    lp.run_until_idle();
    assert_eq!(out.value().unwrap(), -1);
}

/// No callback runs while the settling code is still on the stack.
#[test]
fn run_to_completion_holds_across_settlement() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    let (dv, c) = DeferredValue::<i32>::pending(&h);
    {
        let order = Rc::clone(&order);
        dv.then(move |_| {
            order.borrow_mut().push("handler");
            Step::now(())
        });
    }
    order.borrow_mut().push("before-resolve");
    c.resolve(1);
    order.borrow_mut().push("after-resolve");

    lp.run_until_idle();
    assert_eq!(
        *order.borrow(),
        ["before-resolve", "after-resolve", "handler"]
    );
}

/// Settle hooks observe both branches and fire before chain continuations.
#[test]
fn settle_hooks_see_the_outcome_first() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    let (dv, c) = DeferredValue::<i32>::pending(&h);
    {
        let order = Rc::clone(&order);
        dv.then(move |v| {
            order.borrow_mut().push(format!("then:{v}"));
            Step::now(())
        });
    }
    {
        let order = Rc::clone(&order);
        dv.on_settle(move |outcome| {
            order
                .borrow_mut()
                .push(format!("hook:{}", outcome.state()));
        });
    }
    c.resolve(5);
    lp.run_until_idle();
    assert_eq!(*order.borrow(), ["hook:fulfilled", "then:5"]);
}

/// Progress buffered before subscription replays in order, then live
/// values follow; settlement closes the channel.
#[test]
fn progress_replay_then_live_delivery() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let (dv, c) = DeferredValue::<&'static str>::pending(&h);
    c.progress(1.0);
    c.progress(2.0);

    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        dv.progress_subscribe(move |p| seen.borrow_mut().push(p));
    }
    c.progress(3.0);
    c.resolve("done");
    assert!(!c.progress(4.0));

    lp.run_until_idle();
    assert_eq!(*seen.borrow(), [1.0, 2.0, 3.0]);
    assert_eq!(dv.value().unwrap(), "done");
}

/// Cancellation rejects a pending cancelable value and only that.
#[test]
fn cancellation_is_cooperative_and_pending_only() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let released = Rc::new(RefCell::new(false));
    let (dv, cancel) = DeferredValue::<i32>::cancellable(&h, |_c| {});
    {
        let released = Rc::clone(&released);
        dv.on_settle(move |outcome| {
            // The executor's cleanup path observes the rejection.
            if outcome.is_rejected() {
                *released.borrow_mut() = true;
            }
        });
    }

    assert!(cancel.cancel());
    assert!(*released.borrow());
    assert!(dv.reason().unwrap().is_cancellation());

    // A second cancel, and cancel on a settled value, are no-ops.
    assert!(!cancel.cancel());
    lp.run_until_idle();
    let _ = lp.drain_logs();
}

/// Strict mode turns a double settle into a panic; the default warns.
#[test]
fn settle_policy_strict_vs_warn() {
    let warn_loop = EventLoop::default();
    let (_dv, c) = DeferredValue::<i32>::pending(&warn_loop.handle());
    c.resolve(1);
    assert!(!c.resolve(2));
    assert!(warn_loop
        .drain_logs()
        .iter()
        .any(|e| e.message() == "double settle ignored"));

    let strict_loop = EventLoop::new(RuntimeConfig::new().with_settle(SettlePolicy::Strict));
    let (_dv, c) = DeferredValue::<i32>::pending(&strict_loop.handle());
    c.resolve(1);
    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.resolve(2)));
    assert!(panicked.is_err());
}

/// A slow source rejects through its timeout mirror with the given
/// message, while the source itself is left running and settles later.
#[test]
fn timeout_rejects_without_killing_upstream() {
    let lp = EventLoop::default();
    let h = lp.handle();

    let source = h.after_value(Duration::from_millis(50), "v");
    let out = source.timeout_with(
        Duration::from_millis(10),
        Fault::timeout().with_context("slow"),
    );

    lp.run_until_idle();
    let fault = out.reason().unwrap();
    assert_eq!(fault.kind(), FaultKind::Timeout);
    assert_eq!(fault.context(), Some("slow"));
    assert_eq!(source.value().unwrap(), "v");
    assert_eq!(lp.now().as_millis(), 50);
    let _ = lp.drain_logs();
}

/// `finally` runs on both branches and re-emits the original outcome.
#[test]
fn finally_is_transparent_on_both_branches() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let runs = Rc::new(RefCell::new(0));

    let ok = {
        let runs = Rc::clone(&runs);
        DeferredValue::resolved(&h, 1).finally(move || {
            *runs.borrow_mut() += 1;
            Step::now(())
        })
    };
    let err = {
        let runs = Rc::clone(&runs);
        DeferredValue::<i32>::rejected(&h, Fault::user("kept")).finally(move || {
            *runs.borrow_mut() += 1;
            Step::now(())
        })
    };

    lp.run_until_idle();
    assert_eq!(*runs.borrow(), 2);
    assert_eq!(ok.value().unwrap(), 1);
    assert_eq!(err.reason().unwrap().context(), Some("kept"));
    let _ = lp.drain_logs();
}

/// State accessors refuse reads the current state does not permit.
#[test]
fn introspection_is_state_checked() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let (dv, c) = DeferredValue::<i32>::pending(&h);

    assert_eq!(dv.state(), DvState::Pending);
    assert_eq!(dv.value().unwrap_err().kind(), FaultKind::InvalidState);

    c.reject(Fault::user("why"));
    assert_eq!(dv.state(), DvState::Rejected);
    assert_eq!(dv.value().unwrap_err().kind(), FaultKind::InvalidState);
    assert_eq!(dv.reason().unwrap().context(), Some("why"));

    // The trace now carries both the creation and the rejection site.
    let trace = dv.trace();
    assert!(trace.rejected_at().is_some());
    assert!(trace.to_string().contains("rejected at"));
    lp.run_until_idle();
    let _ = lp.drain_logs();
}
