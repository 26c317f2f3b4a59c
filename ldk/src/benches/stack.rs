use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::{hint::black_box, rc::Rc};
use strata_ldk::{
    buffer::{Bounded, SizeUnit},
    delayed::Delayed,
    tools::{stubs, Stub},
    Builder, CommandRegistry, Fun,
};
use strata_runtime::deterministic::Executor;

fn chain(depth: usize) -> Fun {
    let (_, context, _) = Executor::default();
    let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "bench");
    let names: Vec<String> = (0..depth).map(|i| format!("fu{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    stubs(&fun, &refs).expect("failed to add stubs");
    for pair in refs.windows(2) {
        fun.connect(pair[0], pair[1]).expect("failed to connect");
    }
    fun.on_fun_created().expect("failed to create fun");
    fun
}

fn bench_send_data(c: &mut Criterion) {
    for depth in [2, 8, 32] {
        c.bench_function(
            &format!("{}/fn=send_data depth={depth}", module_path!()),
            |b| {
                b.iter_batched(
                    || chain(depth),
                    |fun| {
                        let top = fun.get("fu0").expect("missing top");
                        for _ in 0..100 {
                            top.send_data(fun.create_compound(None));
                        }
                        let bottom = fun
                            .find_friend::<Stub>(&format!("fu{}", depth - 1))
                            .expect("missing bottom");
                        black_box(bottom.sent().len())
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

fn bench_buffer_drain(c: &mut Criterion) {
    let compounds = 1_000u64;
    c.bench_function(
        &format!("{}/fn=buffer_drain compounds={compounds}", module_path!()),
        |b| {
            b.iter_batched(
                || {
                    let (_, context, _) = Executor::default();
                    let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "bench");
                    let lower = {
                        stubs(&fun, &["upper"]).expect("failed to add stub");
                        fun.add(
                            Builder::new("buffer"),
                            Delayed::new(Bounded::new(compounds, SizeUnit::Compounds)),
                        )
                        .expect("failed to add buffer");
                        stubs(&fun, &["lower"]).expect("failed to add stub").remove(0)
                    };
                    fun.connect("upper", "buffer").expect("failed to connect");
                    fun.connect("buffer", "lower").expect("failed to connect");
                    lower.close();
                    let upper = fun.get("upper").expect("missing upper");
                    for _ in 0..compounds {
                        upper.send_data(fun.create_compound(None));
                    }
                    (fun, lower)
                },
                |(_fun, lower)| {
                    lower.open(true);
                    black_box(lower.sent().len())
                },
                BatchSize::SmallInput,
            );
        },
    );
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_send_data, bench_buffer_drain,
}
criterion_main!(benches);
