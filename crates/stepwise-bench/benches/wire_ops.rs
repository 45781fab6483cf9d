//! Criterion micro-benchmarks for the trigger wire format and property
//! tree access.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use stepwise_props::PropertyTree;
use stepwise_timing::{TriggerAck, TriggerTick};

/// Benchmark: decode a trigger tick and encode the matching ack.
fn bench_trigger_round(c: &mut Criterion) {
    let tick = TriggerTick {
        current_time: 120_000,
        sim_time_step: 10_000,
    }
    .encode();

    c.bench_function("trigger_decode_ack_encode", |b| {
        b.iter(|| {
            let tick = TriggerTick::decode(black_box(&tick)).unwrap();
            let ack = TriggerAck::new(
                "6f1c2b1e-4a8e-4d6b-9b1a-3c2d1e0f9a8b",
                850,
                tick.current_time,
            )
            .unwrap();
            black_box(ack.encode());
        });
    });
}

/// Benchmark: read an integer property four levels deep.
fn bench_property_get(c: &mut Criterion) {
    let tree = PropertyTree::new();
    for i in 0..32 {
        tree.set_value(&format!("Plant.Stage{i}.Valve.Opening"), i)
            .unwrap();
    }

    c.bench_function("property_get_value_depth4", |b| {
        b.iter(|| {
            let v: i32 = tree
                .get_value(black_box("Plant.Stage17.Valve.Opening"), 0)
                .unwrap();
            black_box(v);
        });
    });
}

criterion_group!(benches, bench_trigger_round, bench_property_get);
criterion_main!(benches);
