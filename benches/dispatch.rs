//! Dispatch benchmark suite.
//!
//! Benchmarks the two hot paths:
//! - chain dispatch: settle-to-handler latency through the microtask queue
//! - scheduler pump: admission, sort, launch, and completion routing

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use deferval::{
    DeferredValue, EventLoop, JobConfig, Scheduler, SchedulerConfig, Step,
};

fn bench_chain_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_dispatch");
    for depth in [1_usize, 16, 64] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let lp = EventLoop::default();
                let h = lp.handle();
                let mut dv = DeferredValue::resolved(&h, 0_u64);
                for _ in 0..depth {
                    dv = dv.then(|v| Step::now(v + 1));
                }
                lp.run_until_idle();
                black_box(dv.value().unwrap())
            });
        });
    }
    group.finish();
}

fn bench_scheduler_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_pump");
    for jobs in [8_usize, 64] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| {
                let lp = EventLoop::default();
                let h = lp.handle();
                let scheduler: Scheduler<u64> =
                    Scheduler::new(&h, SchedulerConfig::new().with_concurrency(4));
                for i in 0..jobs {
                    let h2 = h.clone();
                    scheduler
                        .add(
                            move || DeferredValue::resolved(&h2, i as u64),
                            JobConfig::new().with_priority((i % 7) as i32),
                        )
                        .expect("unbounded queue admits");
                }
                lp.run_until_idle();
                black_box(scheduler.stats().completed_jobs)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain_dispatch, bench_scheduler_pump);
criterion_main!(benches);
