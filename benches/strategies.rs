//! Strategy benchmarks: per-evaluation cost of each strategy and of the
//! gain solve and regression that run on every refit.
//!
//! A control tick must fit many evaluations inside its period, so the
//! evaluate numbers bound how high `control_updates` can usefully go.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{DMatrix, DVector};
use tokio_resource_controller::strategy::gain::{DareSolver, GainSolver};
use tokio_resource_controller::strategy::{
    ControlStrategy, LqrStrategy, PidGains, PidStrategy, StateSpaceModel,
};
use tokio_resource_controller::trainer::regression::fit_ols;
use tokio_resource_controller::{Actuator, IdAllocator, ModelCodec};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn actuators(ids: &mut IdAllocator, count: usize) -> Vec<Actuator> {
    (0..count)
        .map(|i| {
            Actuator::integer(ids, format!("knob{i}"), 100)
                .with_bounds(1.0, 10_000.0)
                .expect("bounds")
        })
        .collect()
}

fn lqr(states: usize, inputs: usize, ids: &mut IdAllocator) -> (LqrStrategy, Vec<Actuator>) {
    let acts = actuators(ids, inputs);
    let b = DMatrix::from_fn(states, inputs, |r, c| 0.05 * ((r + c) % 3) as f64 + 0.01);
    let model = StateSpaceModel::new(
        DMatrix::identity(states, states),
        b,
        DMatrix::identity(states, states),
        DMatrix::zeros(states, inputs),
    )
    .expect("model");
    let codec = Arc::new(ModelCodec::new(&vec![1.0; states]));
    let input_ids = acts.iter().map(Actuator::id).collect();
    let u0 = DVector::from_element(inputs, 100f64.ln());
    let strategy = LqrStrategy::new(
        model,
        DMatrix::identity(states, states),
        DMatrix::identity(inputs, inputs) * 10.0,
        input_ids,
        codec,
        Arc::new(DareSolver::default()),
    )
    .expect("lqr")
    .with_initial_state(DVector::zeros(states), u0)
    .expect("initial state");
    (strategy, acts)
}

// ---------------------------------------------------------------------------
// Bench: evaluate
// ---------------------------------------------------------------------------

fn bench_pid_evaluate(c: &mut Criterion) {
    let mut ids = IdAllocator::new();
    let mut acts = actuators(&mut ids, 5);
    let mut pid = PidStrategy::new(PidGains::new(0.05, 0.01, 0.001));
    let measurements = [55.0, 70.0];
    let setpoints = [Some(40.0), None];

    c.bench_function("pid_evaluate", |b| {
        b.iter(|| {
            let done = pid.evaluate(
                &mut acts,
                black_box(&measurements),
                black_box(&setpoints),
                Duration::from_millis(250),
            );
            black_box(done)
        })
    });
}

fn bench_lqr_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("lqr_evaluate");
    for (states, inputs) in [(1usize, 1usize), (2, 5), (4, 8)] {
        let mut ids = IdAllocator::new();
        let (mut lqr, mut acts) = lqr(states, inputs, &mut ids);
        let measurements = vec![3.5; states];
        let setpoints = vec![Some(3.7); states];
        group.bench_with_input(
            BenchmarkId::new("shape", format!("{states}x{inputs}")),
            &states,
            |b, _| {
                b.iter(|| {
                    let done = lqr.evaluate(
                        &mut acts,
                        black_box(&measurements),
                        black_box(&setpoints),
                        Duration::from_secs(1),
                    );
                    black_box(done)
                })
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: refit work
// ---------------------------------------------------------------------------

fn bench_dare_solve(c: &mut Criterion) {
    let solver = DareSolver::default();
    let mut group = c.benchmark_group("dare_solve");
    group.sample_size(30);
    for (states, inputs) in [(2usize, 5usize), (4, 8)] {
        let a = DMatrix::identity(states, states) * 0.95;
        let b = DMatrix::from_fn(states, inputs, |r, c| 0.1 * ((r * inputs + c) % 4) as f64 + 0.05);
        let q = DMatrix::identity(states, states);
        let r = DMatrix::identity(inputs, inputs);
        group.bench_with_input(
            BenchmarkId::new("shape", format!("{states}x{inputs}")),
            &states,
            |bench, _| bench.iter(|| black_box(solver.solve(&a, &b, &q, &r))),
        );
    }
    group.finish();
}

fn bench_fit_ols(c: &mut Criterion) {
    // 50 calibration buckets over 5 log-domain inputs.
    let predictors: Vec<Vec<f64>> = (0..50)
        .map(|i| (0..5).map(|j| (((i * 7 + j * 13) % 97) as f64 + 1.0).ln()).collect())
        .collect();
    let targets: Vec<f64> = predictors
        .iter()
        .map(|x| 2.0 + x.iter().enumerate().map(|(j, v)| 0.1 * j as f64 * v).sum::<f64>())
        .collect();

    c.bench_function("fit_ols_50x5", |b| {
        b.iter(|| black_box(fit_ols(black_box(&predictors), black_box(&targets))))
    });
}

criterion_group!(
    benches,
    bench_pid_evaluate,
    bench_lqr_evaluate,
    bench_dare_solve,
    bench_fit_ols
);
criterion_main!(benches);
