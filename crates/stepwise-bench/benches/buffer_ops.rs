//! Criterion micro-benchmarks for sample buffer update and lookup.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use stepwise_bench::{filled_buffer, payload, BENCH_HANDLE};
use stepwise_core::DataSample;
use stepwise_data::Selection;

const CYCLE: i64 = 1_000;

/// Benchmark: store a 256-byte sample into a full 64-slot backlog.
fn bench_buffer_update(c: &mut Criterion) {
    let buffer = filled_buffer(64, 256, CYCLE);
    let mut time = 65 * CYCLE;
    let data = payload(time, 256);

    c.bench_function("buffer_update_64x256", |b| {
        b.iter(|| {
            buffer
                .update(&DataSample::new(BENCH_HANDLE, time, data.clone()))
                .unwrap();
            time += CYCLE;
        });
    });
}

/// Benchmark: lock and unlock the sample nearest to a time between slots.
fn bench_buffer_nearest(c: &mut Criterion) {
    let buffer = filled_buffer(64, 256, CYCLE);

    c.bench_function("buffer_lock_nearest_64", |b| {
        b.iter(|| {
            let locked = buffer
                .lock_data_at(Selection::Nearest, black_box(31 * CYCLE + 400))
                .unwrap();
            black_box(locked.time());
            buffer.unlock_data(&locked).unwrap();
        });
    });
}

/// Benchmark: lock and unlock the newest sample not after a time.
fn bench_buffer_upper_bound(c: &mut Criterion) {
    let buffer = filled_buffer(64, 256, CYCLE);

    c.bench_function("buffer_lock_upper_bound_64", |b| {
        b.iter(|| {
            let locked = buffer
                .lock_data_at_upper_bound(black_box(47 * CYCLE + 10))
                .unwrap();
            black_box(locked.data()[0]);
            buffer.unlock_data(&locked).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_buffer_update,
    bench_buffer_nearest,
    bench_buffer_upper_bound
);
criterion_main!(benches);
