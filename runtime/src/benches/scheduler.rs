use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::Rng;
use std::{cell::Cell, hint::black_box, rc::Rc, time::Duration};
use strata_runtime::{deterministic::Executor, Runner, Scheduler};

fn bench_process(c: &mut Criterion) {
    for events in [1_000, 10_000, 100_000] {
        c.bench_function(
            &format!("{}/fn=process events={events}", module_path!()),
            |b| {
                b.iter_batched(
                    || Executor::seeded(events),
                    |(executor, _, _)| {
                        let processed = Rc::new(Cell::new(0u64));
                        executor.start(|mut context| {
                            for _ in 0..events {
                                let delay = Duration::from_micros(context.gen_range(0..1_000_000));
                                let processed = processed.clone();
                                context.schedule_delay(delay, move |_| {
                                    processed.set(processed.get() + 1);
                                });
                            }
                        });
                        black_box(processed.get())
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

fn bench_cancel(c: &mut Criterion) {
    let events = 10_000u64;
    c.bench_function(
        &format!("{}/fn=cancel events={events}", module_path!()),
        |b| {
            b.iter_batched(
                || Executor::seeded(events),
                |(executor, _, _)| {
                    executor.start(|context| {
                        let handles: Vec<_> = (0..events)
                            .map(|i| context.schedule_delay(Duration::from_millis(i), |_| {}))
                            .collect();
                        for handle in handles.iter().step_by(2) {
                            context.cancel(handle);
                        }
                        black_box(context.pending())
                    })
                },
                BatchSize::SmallInput,
            );
        },
    );
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_process, bench_cancel,
}
criterion_main!(benches);
