//! Timeout decoration for deferred values.
//!
//! A timeout never kills upstream work: the decorator mirrors its source
//! and arms a one-shot timer; on expiry the mirror rejects while the
//! source keeps running. Settlement of the source cancels the timer.

use std::time::Duration;

use crate::error::Fault;
use crate::runtime::LoopHandle;

use super::DeferredValue;

impl<T: Clone + 'static> DeferredValue<T> {
    /// Returns a mirror of this value that rejects with a timeout fault if
    /// the source has not settled within `after`.
    #[must_use]
    #[track_caller]
    pub fn timeout(&self, after: Duration) -> Self {
        self.timeout_with(
            after,
            Fault::timeout().with_context(format!("timed out after {after:?}")),
        )
    }

    /// Returns a mirror of this value that rejects with `fault` if the
    /// source has not settled within `after`.
    ///
    /// The mirror forwards the source's settlement and progress; the source
    /// itself is never cancelled by the timer.
    #[must_use]
    #[track_caller]
    pub fn timeout_with(&self, after: Duration, fault: Fault) -> Self {
        let mirror = Self::created(&self.h);

        let timer = {
            let expire = mirror.clone();
            self.h.set_timer(after, move || {
                expire.complete_fault(fault);
            })
        };

        let disarm = self.h.clone();
        let disarm2 = self.h.clone();
        let fulfill = mirror.clone();
        let reject = mirror.clone();
        self.subscribe(
            move |v| {
                disarm.cancel_timer(timer);
                fulfill.complete_value(v);
            },
            move |f| {
                disarm2.cancel_timer(timer);
                reject.complete_fault(f);
            },
            true,
        );

        let forward = mirror.clone();
        self.progress_subscribe(move |p| {
            forward.push_progress(p);
        });

        mirror
    }
}

impl LoopHandle {
    /// Returns a deferred value fulfilling with `()` after `delay`.
    #[must_use]
    #[track_caller]
    pub fn after(&self, delay: Duration) -> DeferredValue<()> {
        self.after_value(delay, ())
    }

    /// Returns a deferred value fulfilling with `value` after `delay`.
    #[must_use]
    #[track_caller]
    pub fn after_value<T: Clone + 'static>(&self, delay: Duration, value: T) -> DeferredValue<T> {
        let dv = DeferredValue::created(self);
        let fulfill = dv.clone();
        self.set_timer(delay, move || {
            fulfill.complete_value(value);
        });
        dv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use crate::{DvState, FaultKind, Step};

    #[test]
    fn slow_source_times_out() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let slow = h.after_value(Duration::from_millis(50), "v");
        let out = slow.timeout(Duration::from_millis(10));
        lp.run_until_idle();
        let fault = out.reason().unwrap();
        assert_eq!(fault.kind(), FaultKind::Timeout);
        // The source was not cancelled; it settled on its own later.
        assert_eq!(slow.value().unwrap(), "v");
        let _ = lp.drain_logs();
    }

    #[test]
    fn fast_source_cancels_the_timer() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let fast = h.after_value(Duration::from_millis(5), 9);
        let out = fast.timeout(Duration::from_millis(50));
        lp.run_until_idle();
        assert_eq!(out.value().unwrap(), 9);
        // The clock never needed to reach the timeout deadline.
        assert_eq!(lp.now().as_millis(), 5);
    }

    #[test]
    fn rejection_mirrors_through() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let (source, c) = DeferredValue::<i32>::pending(&h);
        let out = source.timeout(Duration::from_millis(50));
        c.reject(Fault::user("inner"));
        lp.run_until_idle();
        assert_eq!(out.reason().unwrap().context(), Some("inner"));
        let _ = lp.drain_logs();
    }

    #[test]
    fn progress_forwards_through_the_mirror() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let (source, c) = DeferredValue::<i32>::pending(&h);
        let out = source.timeout(Duration::from_millis(50));
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        {
            let seen = std::rc::Rc::clone(&seen);
            out.progress_subscribe(move |p| seen.borrow_mut().push(p));
        }
        c.progress(25.0);
        lp.run_until_idle();
        assert_eq!(*seen.borrow(), [25.0]);
    }

    #[test]
    fn timeout_with_custom_fault() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let (source, _c) = DeferredValue::<i32>::pending(&h);
        let out = source.timeout_with(Duration::from_millis(1), Fault::user("slow"));
        lp.run_until_idle();
        assert_eq!(out.reason().unwrap().context(), Some("slow"));
        let _ = lp.drain_logs();
    }

    #[test]
    fn after_value_fulfills_on_schedule() {
        let lp = EventLoop::default();
        let h = lp.handle();
        let dv = h.after_value(Duration::from_millis(30), 3);
        let chained = dv.then(|v| Step::now(v * 2));
        assert_eq!(dv.state(), DvState::Pending);
        lp.run_until_idle();
        assert_eq!(chained.value().unwrap(), 6);
        assert_eq!(lp.now().as_millis(), 30);
    }
}
