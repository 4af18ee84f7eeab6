use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chunktape::{grad, Active, ActiveTape, LinearTape, ReuseTape, TapeBehavior, TapeGuard};

#[path = "common/mod.rs"]
mod common;
use common::*;

fn bench_reverse_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_gradient");
    for n in [2, 10, 100, 1000] {
        let x = make_input(n);

        group.bench_with_input(BenchmarkId::new("f64_eval", n), &x, |b, x| {
            b.iter(|| black_box(rosenbrock_f64(black_box(x))))
        });

        group.bench_with_input(BenchmarkId::new("rosenbrock_rev", n), &x, |b, x| {
            b.iter(|| black_box(grad(|v| rosenbrock(v), black_box(x))))
        });

        group.bench_with_input(BenchmarkId::new("rosenbrock_fd", n), &x, |b, x| {
            b.iter(|| black_box(finite_diff_gradient(rosenbrock_f64, x, 1e-7)))
        });

        group.bench_with_input(BenchmarkId::new("rastrigin_rev", n), &x, |b, x| {
            b.iter(|| black_box(grad(|v| rastrigin(v), black_box(x))))
        });
    }
    group.finish();
}

/// Replay cost alone: record once, sweep many times.
fn bench_replay_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_only");
    for n in [10, 1000] {
        let x = make_input(n);

        let mut linear = LinearTape::<f64>::new();
        let (inputs, y) = {
            let _guard = TapeGuard::new(&mut linear);
            let inputs: Vec<Active<LinearTape<f64>>> = x.iter().map(|&v| Active::new_input(v)).collect();
            let y = rosenbrock(&inputs);
            (inputs, y)
        };
        group.bench_function(BenchmarkId::new("linear", n), |b| {
            b.iter(|| {
                linear.clear_adjoints();
                linear.set_gradient(y.identifier(), 1.0);
                linear.evaluate();
                black_box(linear.gradient(inputs[0].identifier()))
            })
        });

        let mut reuse = ReuseTape::<f64>::new();
        let guard = TapeGuard::new(&mut reuse);
        let rinputs: Vec<Active<ReuseTape<f64>>> = x.iter().map(|&v| Active::new_input(v)).collect();
        let ry = rosenbrock(&rinputs);
        group.bench_function(BenchmarkId::new("reuse", n), |b| {
            b.iter(|| {
                ReuseTape::<f64>::with_active(|t| {
                    t.clear_adjoints();
                    t.set_gradient(ry.identifier(), 1.0);
                    t.evaluate();
                    black_box(t.gradient(rinputs[0].identifier()))
                })
            })
        });
        drop(ry);
        drop(rinputs);
        drop(guard);
    }
    group.finish();
}

criterion_group!(benches, bench_reverse_gradient, bench_replay_only);
criterion_main!(benches);
