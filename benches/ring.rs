//! Benchmarks for the bounded MPMC ring.
//!
//! Covers the uncontended hot path, wraparound cycles, and a contended
//! producer/consumer pair.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskring::Ring;

const OPS_PER_ITER: u64 = 10_000;

fn bench_push_pop_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_push_pop_cycle");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    for capacity in [8usize, 64, 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let ring = Ring::<u64>::new(capacity);
                b.iter(|| {
                    for i in 0..OPS_PER_ITER {
                        ring.push(black_box(i)).unwrap();
                        black_box(ring.pop().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_fill_drain");

    for capacity in [64usize, 1024] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let ring = Ring::<u64>::new(capacity);
                b.iter(|| {
                    for i in 0..capacity as u64 {
                        ring.push(black_box(i)).unwrap();
                    }
                    for _ in 0..capacity {
                        black_box(ring.pop().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_contended_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_contended_pair");
    group.throughput(Throughput::Elements(OPS_PER_ITER));
    group.sample_size(20);

    group.bench_function("one_producer_one_consumer", |b| {
        b.iter_custom(|iters| {
            let ring = Arc::new(Ring::<u64>::new(1024));
            let stop = Arc::new(AtomicBool::new(false));

            let consumer = {
                let ring = ring.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        if ring.pop().is_none() {
                            std::hint::spin_loop();
                        }
                    }
                    while ring.pop().is_some() {}
                })
            };

            let start = std::time::Instant::now();
            for _ in 0..iters {
                for i in 0..OPS_PER_ITER {
                    let mut v = i;
                    loop {
                        match ring.push(v) {
                            Ok(()) => break,
                            Err(back) => {
                                v = back;
                                std::hint::spin_loop();
                            }
                        }
                    }
                }
            }
            let elapsed = start.elapsed();

            stop.store(true, Ordering::Relaxed);
            consumer.join().unwrap();
            elapsed
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_cycle,
    bench_fill_drain,
    bench_contended_pair
);
criterion_main!(benches);
