// tick-scheduler: dispatch-path benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tick_scheduler::prelude::*;

fn bench_single_task_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_task_pass");

    group.bench_function("due_every_pass", |b| {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.add_task(
            TaskBuilder::new(0, Iterations::FOREVER, |_| {}).build().unwrap(),
        );
        scheduler.enable(handle, 0).unwrap();

        b.iter(|| {
            let idle = scheduler.execute(black_box(0));
            black_box(idle)
        });
    });

    group.bench_function("not_due", |b| {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.add_task(
            TaskBuilder::new(1_000_000, Iterations::FOREVER, |_| {}).build().unwrap(),
        );
        scheduler.enable(handle, 0).unwrap();

        b.iter(|| {
            let idle = scheduler.execute(black_box(1));
            black_box(idle)
        });
    });

    group.finish();
}

fn bench_chain_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_scan");

    for task_count in [1usize, 10, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::new("tasks", task_count),
            &task_count,
            |b, &count| {
                let mut scheduler = Scheduler::new();
                for _ in 0..count {
                    let handle = scheduler.add_task(
                        TaskBuilder::new(10, Iterations::FOREVER, |_| {}).build().unwrap(),
                    );
                    scheduler.enable(handle, 0).unwrap();
                }

                b.iter(|| {
                    let idle = scheduler.execute(black_box(5));
                    black_box(idle)
                });
            },
        );
    }

    group.finish();
}

fn bench_enable_disable_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("enable_disable_cycle");

    group.bench_function("enable_then_disable", |b| {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.add_task(
            TaskBuilder::new(100, Iterations::FOREVER, |_| {}).build().unwrap(),
        );

        b.iter(|| {
            scheduler.enable(black_box(handle), 0).unwrap();
            scheduler.disable(black_box(handle)).unwrap();
        });
    });

    group.finish();
}

#[cfg(feature = "status-request")]
fn bench_status_request_signal(c: &mut Criterion) {
    let mut group = c.benchmark_group("status_request_signal");

    group.bench_function("signal", |b| {
        let sr = StatusRequest::new();
        sr.set_waiting(u32::MAX / 2);

        b.iter(|| {
            sr.signal(black_box(0));
        });
    });

    group.finish();
}

#[cfg(feature = "priority-layers")]
fn bench_priority_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_layers");

    group.bench_function("base_plus_one_layer", |b| {
        let mut high = Scheduler::new();
        let h = high.add_task(TaskBuilder::new(0, Iterations::FOREVER, |_| {}).build().unwrap());
        high.enable(h, 0).unwrap();

        let mut base = Scheduler::new();
        let base_handle = base.add_task(
            TaskBuilder::new(0, Iterations::FOREVER, |_| {}).build().unwrap(),
        );
        base.enable(base_handle, 0).unwrap();
        base.set_high_priority_scheduler(high);

        b.iter(|| {
            let idle = base.execute(black_box(0));
            black_box(idle)
        });
    });

    group.finish();
}

#[cfg(all(feature = "status-request", feature = "priority-layers"))]
criterion_group!(
    benches,
    bench_single_task_pass,
    bench_chain_scan,
    bench_enable_disable_cycle,
    bench_status_request_signal,
    bench_priority_layers
);

#[cfg(all(feature = "status-request", not(feature = "priority-layers")))]
criterion_group!(
    benches,
    bench_single_task_pass,
    bench_chain_scan,
    bench_enable_disable_cycle,
    bench_status_request_signal
);

#[cfg(all(not(feature = "status-request"), feature = "priority-layers"))]
criterion_group!(
    benches,
    bench_single_task_pass,
    bench_chain_scan,
    bench_enable_disable_cycle,
    bench_priority_layers
);

#[cfg(not(any(feature = "status-request", feature = "priority-layers")))]
criterion_group!(
    benches,
    bench_single_task_pass,
    bench_chain_scan,
    bench_enable_disable_cycle
);

criterion_main!(benches);
