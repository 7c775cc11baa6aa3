//! Benchmarks for the blocking channel's non-suspending surface.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use taskring::{BlockingChannel, ThreadHost};

const OPS_PER_ITER: u64 = 10_000;

fn bench_nowait_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_nowait_round_trip");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    for capacity in [8usize, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let chan: BlockingChannel<u64, ThreadHost> = BlockingChannel::new(capacity, 2);
                b.iter(|| {
                    for i in 0..OPS_PER_ITER {
                        chan.push_nowait(black_box(i)).unwrap();
                        black_box(chan.pop_nowait().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_drain_nowait");

    for batch in [16usize, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let chan: BlockingChannel<u64, ThreadHost> = BlockingChannel::new(batch, 2);
            let mut out: Vec<u64> = Vec::with_capacity(batch);
            b.iter(|| {
                for i in 0..batch as u64 {
                    chan.push_nowait(i).unwrap();
                }
                out.clear();
                let moved = chan.drain_nowait(&mut out);
                black_box(moved);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_nowait_round_trip, bench_drain);
criterion_main!(benches);
