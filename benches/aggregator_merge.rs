//! Benchmark for Aggregator merge and drain performance

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pin_reporting::aggregator::Aggregator;
use pin_reporting::models::{Granularity, PinType};
use std::sync::Arc;

const START: i64 = 1_455_924_480_000;

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregator_merge");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("merge_1000_samples", |b| {
        let aggregator = Aggregator::new();
        let owner: Arc<str> = Arc::from("bench@test.com");
        b.iter(|| {
            for i in 0..1000i64 {
                aggregator.merge(
                    black_box(&owner),
                    1,
                    PinType::Virtual,
                    (i % 16) as u8,
                    START + i * 1_000,
                    i as f64,
                );
            }
        });
    });

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregator_drain");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("drain_1000_keys", |b| {
        b.iter_batched(
            || {
                let aggregator = Aggregator::new();
                let owner: Arc<str> = Arc::from("bench@test.com");
                for i in 0..1000i64 {
                    aggregator.merge(&owner, 1, PinType::Virtual, 0, START + i * 60_000, 1.0);
                }
                aggregator
            },
            |aggregator| {
                black_box(aggregator.drain(Granularity::Minute));
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_concurrent_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregator_concurrent");
    group.throughput(Throughput::Elements(10000));

    group.bench_function("concurrent_merge_10000", |b| {
        b.iter(|| {
            let aggregator = Arc::new(Aggregator::new());
            let handles: Vec<_> = (0..10)
                .map(|t| {
                    let aggregator = Arc::clone(&aggregator);
                    std::thread::spawn(move || {
                        let owner: Arc<str> = Arc::from("bench@test.com");
                        for i in 0..1000i64 {
                            aggregator.merge(&owner, t, PinType::Analog, 1, START + i, i as f64);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_drain, bench_concurrent_merge);
criterion_main!(benches);
