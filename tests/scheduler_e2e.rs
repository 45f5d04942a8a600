//! Scheduler E2E suite.
//!
//! Drives whole scheduler lifecycles on the virtual clock:
//! - priority admission under a concurrency cap
//! - retry policy, including the no-retry rule for job timeouts
//! - cancellation of queued and running jobs
//! - the idle signal and per-job completion waits

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use deferval::{
    DeferredValue, EventLoop, Fault, FaultKind, JobConfig, JobState, Scheduler, SchedulerConfig,
    Step,
};

/// With concurrency 1, queued jobs run strictly by priority.
#[test]
fn priority_decides_execution_order() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<&'static str> = Scheduler::new(&h, SchedulerConfig::new());
    let order = Rc::new(RefCell::new(Vec::new()));

    for (label, priority) in [("A", 1), ("B", 10), ("C", 5), ("D", 100)] {
        let h2 = h.clone();
        let order = Rc::clone(&order);
        scheduler
            .add(
                move || {
                    order.borrow_mut().push(label);
                    DeferredValue::resolved(&h2, label)
                },
                JobConfig::new().with_priority(priority),
            )
            .unwrap();
    }

    lp.run_until_idle();
    assert_eq!(*order.borrow(), ["D", "B", "C", "A"]);
    assert_eq!(scheduler.stats().completed_jobs, 4);
}

/// A job that fails twice and succeeds on the third attempt completes
/// with `attempts == 3` and no failure counted.
#[test]
fn retry_policy_retries_until_success() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<&'static str> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    let id = scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    let n = attempts.get() + 1;
                    attempts.set(n);
                    if n < 3 {
                        DeferredValue::rejected(&h, Fault::user("flaky"))
                    } else {
                        DeferredValue::resolved(&h, "ok")
                    }
                }
            },
            JobConfig::new().with_retries(2),
        )
        .unwrap();

    lp.run_until_idle();
    let snapshot = scheduler.get_job(id).unwrap();
    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.attempts, 3);
    assert_eq!(snapshot.result, Some("ok"));
    let stats = scheduler.stats();
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.failed_jobs, 0);
    let _ = lp.drain_logs();
}

/// A retry delay holds the job out of the queue on the virtual clock.
#[test]
fn retry_delay_is_honored() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    let n = attempts.get() + 1;
                    attempts.set(n);
                    if n == 1 {
                        DeferredValue::rejected(&h, Fault::user("first try"))
                    } else {
                        DeferredValue::resolved(&h, 1)
                    }
                }
            },
            JobConfig::new()
                .with_retries(1)
                .with_retry_delay(Duration::from_millis(25)),
        )
        .unwrap();

    lp.run_until_idle();
    assert_eq!(attempts.get(), 2);
    assert_eq!(scheduler.stats().completed_jobs, 1);
    assert!(lp.now().as_millis() >= 25);
    let _ = lp.drain_logs();
}

/// Retries are exhausted after `retries + 1` attempts; the job fails with
/// the last fault.
#[test]
fn retries_exhaust_into_failure() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    let id = scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    attempts.set(attempts.get() + 1);
                    DeferredValue::rejected(&h, Fault::user("always"))
                }
            },
            JobConfig::new().with_retries(2),
        )
        .unwrap();

    lp.run_until_idle();
    assert_eq!(attempts.get(), 3);
    let snapshot = scheduler.get_job(id).unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    assert_eq!(snapshot.error.unwrap().context(), Some("always"));
    assert_eq!(scheduler.stats().failed_jobs, 1);
    let _ = lp.drain_logs();
}

/// A job timeout fails the job immediately: no retries, even with budget
/// left, and the fault carries the job id and the limit.
#[test]
fn job_timeout_never_retries() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    let id = scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    attempts.set(attempts.get() + 1);
                    h.after_value(Duration::from_millis(50), 1)
                }
            },
            JobConfig::new()
                .with_timeout(Duration::from_millis(10))
                .with_retries(5),
        )
        .unwrap();

    lp.run_until_idle();
    assert_eq!(attempts.get(), 1);
    let snapshot = scheduler.get_job(id).unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    let fault = snapshot.error.unwrap();
    assert_eq!(fault.kind(), FaultKind::JobTimeout);
    assert_eq!(fault.job(), Some(id));
    assert_eq!(fault.limit(), Some(Duration::from_millis(10)));
    let _ = lp.drain_logs();
}

/// Cancelling a queued job dequeues it; cancelling a running job cancels
/// its live value cooperatively; terminal jobs refuse.
#[test]
fn cancel_queued_and_running_jobs() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());

    let (never, _keep) = DeferredValue::<i32>::pending(&h);
    let running = scheduler
        .add(move || never.clone(), JobConfig::new())
        .unwrap();
    let queued = scheduler
        .add(
            {
                let h = h.clone();
                move || DeferredValue::resolved(&h, 0)
            },
            JobConfig::new(),
        )
        .unwrap();

    // Let the first job launch and occupy the single slot.
    lp.run_until_idle();
    assert_eq!(scheduler.get_job(running).unwrap().state, JobState::Running);
    assert_eq!(scheduler.get_job(queued).unwrap().state, JobState::Pending);

    assert!(scheduler.cancel_job(queued));
    assert!(scheduler.cancel_job(running));
    assert!(!scheduler.cancel_job(running));

    lp.run_until_idle();
    assert_eq!(scheduler.get_job(queued).unwrap().state, JobState::Canceled);
    assert_eq!(
        scheduler.get_job(running).unwrap().state,
        JobState::Canceled
    );
    assert_eq!(scheduler.stats().canceled_jobs, 2);
    let _ = lp.drain_logs();
}

/// `cancel_all` sweeps pending and running work and reports the ids.
#[test]
fn cancel_all_sweeps_everything_live() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());

    let done = scheduler
        .add(
            {
                let h = h.clone();
                move || DeferredValue::resolved(&h, 1)
            },
            JobConfig::new(),
        )
        .unwrap();
    lp.run_until_idle();

    let (never_a, _ka) = DeferredValue::<i32>::pending(&h);
    let (never_b, _kb) = DeferredValue::<i32>::pending(&h);
    let a = scheduler
        .add(move || never_a.clone(), JobConfig::new())
        .unwrap();
    let b = scheduler
        .add(move || never_b.clone(), JobConfig::new())
        .unwrap();
    lp.run_until_idle();

    let cancelled = scheduler.cancel_all();
    assert_eq!(cancelled, vec![a, b]);
    assert_eq!(scheduler.get_job(done).unwrap().state, JobState::Completed);
    lp.run_until_idle();
    let _ = lp.drain_logs();
}

/// The idle signal fulfills when the last job leaves, pre-fulfills when
/// already idle, and re-arms after firing.
#[test]
fn idle_signal_round_trip() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());

    // Already idle: the signal is pre-fulfilled.
    let idle_now = scheduler.on_idle();
    lp.run_until_idle();
    assert!(idle_now.value().is_ok());

    // Armed while work is in flight; both callers share one signal.
    scheduler
        .add(
            {
                let h = h.clone();
                move || h.after_value(Duration::from_millis(5), 1)
            },
            JobConfig::new(),
        )
        .unwrap();
    let idle_one = scheduler.on_idle();
    let idle_two = scheduler.on_idle();
    let fired = Rc::new(Cell::new(0));
    for idle in [&idle_one, &idle_two] {
        let fired = Rc::clone(&fired);
        idle.then(move |()| {
            fired.set(fired.get() + 1);
            Step::now(())
        });
    }

    lp.run_until_idle();
    assert_eq!(fired.get(), 2);

    // The slot cleared; a fresh wave arms a fresh signal.
    scheduler
        .add(
            {
                let h = h.clone();
                move || h.after_value(Duration::from_millis(5), 2)
            },
            JobConfig::new(),
        )
        .unwrap();
    let idle_again = scheduler.on_idle();
    assert!(!idle_again.is_settled());
    lp.run_until_idle();
    assert!(idle_again.value().is_ok());
}

/// The idle signal waits out retry delays: a job between attempts is
/// neither queued nor running, but the system is not idle.
#[test]
fn idle_waits_for_retry_delays() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    let n = attempts.get() + 1;
                    attempts.set(n);
                    if n == 1 {
                        DeferredValue::rejected(&h, Fault::user("retry me"))
                    } else {
                        DeferredValue::resolved(&h, 1)
                    }
                }
            },
            JobConfig::new()
                .with_retries(1)
                .with_retry_delay(Duration::from_millis(50)),
        )
        .unwrap();

    let idle = scheduler.on_idle();
    lp.run_until_idle();
    assert!(idle.value().is_ok());
    assert_eq!(attempts.get(), 2);
    let _ = lp.drain_logs();
}

/// `wait_for_job` settles on the terminal state only: a retried failure
/// is invisible, the final result is not.
#[test]
fn wait_for_job_reports_terminal_outcome_only() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<&'static str> = Scheduler::new(&h, SchedulerConfig::new());
    let attempts = Rc::new(Cell::new(0_u32));

    let id = scheduler
        .add(
            {
                let h = h.clone();
                let attempts = Rc::clone(&attempts);
                move || {
                    let n = attempts.get() + 1;
                    attempts.set(n);
                    if n == 1 {
                        DeferredValue::rejected(&h, Fault::user("will retry"))
                    } else {
                        DeferredValue::resolved(&h, "final")
                    }
                }
            },
            JobConfig::new().with_retries(1),
        )
        .unwrap();

    let wait = scheduler.wait_for_job(id).unwrap();
    lp.run_until_idle();
    assert_eq!(wait.value().unwrap(), "final");

    // Terminal lookups return an immediately settled value.
    let after = scheduler.wait_for_job(id).unwrap();
    assert_eq!(after.value().unwrap(), "final");

    let unknown = scheduler.wait_for_job(deferval::JobId::new(999)).unwrap_err();
    assert_eq!(unknown.kind(), FaultKind::Scheduler);
    let _ = lp.drain_logs();
}

/// `wait_for_job` on a cancelled job rejects with the job-cancelled fault.
#[test]
fn wait_for_job_sees_cancellation() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());

    let (never, _keep) = DeferredValue::<i32>::pending(&h);
    let id = scheduler
        .add(move || never.clone(), JobConfig::new())
        .unwrap();
    let wait = scheduler.wait_for_job(id).unwrap();

    lp.run_until_idle();
    scheduler.cancel_job(id);
    lp.run_until_idle();

    let fault = wait.reason().unwrap();
    assert_eq!(fault.kind(), FaultKind::JobCancelled);
    assert_eq!(fault.job(), Some(id));
    let _ = lp.drain_logs();
}

/// Without auto-start nothing runs; `start` opens the gate; `stop` cancels
/// the work it finds and closes it again.
#[test]
fn stop_and_start_gate_the_pump() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> =
        Scheduler::new(&h, SchedulerConfig::new().with_auto_start(false));
    let ran = Rc::new(Cell::new(false));

    scheduler
        .add(
            {
                let h = h.clone();
                let ran = Rc::clone(&ran);
                move || {
                    ran.set(true);
                    DeferredValue::resolved(&h, 1)
                }
            },
            JobConfig::new(),
        )
        .unwrap();

    lp.run_until_idle();
    assert!(!ran.get());
    assert!(!scheduler.is_running());

    scheduler.start();
    lp.run_until_idle();
    assert!(ran.get());

    // Stop cancels in-flight work; later admissions queue but do not run.
    let (never, _keep) = DeferredValue::<i32>::pending(&h);
    let victim = scheduler
        .add(move || never.clone(), JobConfig::new())
        .unwrap();
    lp.run_until_idle();
    scheduler.stop();
    lp.run_until_idle();
    assert_eq!(scheduler.get_job(victim).unwrap().state, JobState::Canceled);

    let parked = scheduler
        .add(
            {
                let h = h.clone();
                move || DeferredValue::resolved(&h, 2)
            },
            JobConfig::new(),
        )
        .unwrap();
    lp.run_until_idle();
    assert_eq!(scheduler.get_job(parked).unwrap().state, JobState::Pending);
    let _ = lp.drain_logs();
}

/// Progress from the task's value flows into the job record and clamps.
#[test]
fn progress_propagates_into_the_job() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> = Scheduler::new(&h, SchedulerConfig::new());

    let id = scheduler
        .add(
            {
                let h = h.clone();
                move || {
                    DeferredValue::new(&h, |c| {
                        c.progress(30.0);
                        c.progress(60.0);
                    })
                }
            },
            JobConfig::new(),
        )
        .unwrap();

    lp.run_until_idle();
    let snapshot = scheduler.get_job(id).unwrap();
    assert_eq!(snapshot.state, JobState::Running);
    assert_eq!(snapshot.progress, 60.0);
}

/// Observed totals always reconcile with the per-state counters.
#[test]
fn status_and_stats_reconcile() {
    let lp = EventLoop::default();
    let h = lp.handle();
    let scheduler: Scheduler<i32> =
        Scheduler::new(&h, SchedulerConfig::new().with_concurrency(2));

    for v in 0..3 {
        let h2 = h.clone();
        scheduler
            .add(
                move || h2.after_value(Duration::from_millis(5), v),
                JobConfig::new(),
            )
            .unwrap();
    }
    let failing = {
        let h = h.clone();
        move || DeferredValue::<i32>::rejected(&h, Fault::user("down"))
    };
    scheduler.add(failing, JobConfig::new()).unwrap();

    lp.run_until_idle();
    let status = scheduler.get_status();
    assert!(status.pending.is_empty());
    assert!(status.running.is_empty());
    let stats = &status.stats;
    assert_eq!(stats.total_jobs, 4);
    assert_eq!(
        stats.total_jobs,
        stats.completed_jobs + stats.failed_jobs + stats.canceled_jobs
    );
    assert!(stats.total_time >= Duration::from_millis(5));
    assert!(stats.avg_time > Duration::ZERO);
    let _ = lp.drain_logs();
}
