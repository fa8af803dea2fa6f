//! Record pool and channel benchmarks.
//!
//! Run with: cargo bench --bench pool_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

use slotfeed_core::{Channel, PoolConfig, RecordPool, SlotRecord};

fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");

    for n in [1, 64, 1024] {
        let pool = RecordPool::new(&PoolConfig::default()).expect("pool");
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let records = pool.acquire(n);
                black_box(records.len());
                pool.release(records);
            });
        });
    }

    group.finish();
}

fn bench_channel_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_spsc");
    let items = 10_000usize;
    group.throughput(Throughput::Elements(items as u64));

    for capacity in [16, 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let pool = Arc::new(RecordPool::new(&PoolConfig::default()).expect("pool"));
                b.iter(|| {
                    let channel: Arc<Channel<SlotRecord>> = Channel::shared(capacity);
                    let producer = {
                        let channel = Arc::clone(&channel);
                        let pool = Arc::clone(&pool);
                        thread::spawn(move || {
                            for _ in 0..items {
                                channel.push(pool.acquire_one()).expect("open");
                            }
                            channel.close();
                        })
                    };
                    let mut batch = Vec::new();
                    while channel.pop_batch(256, &mut batch) > 0 {
                        pool.release(batch.drain(..));
                    }
                    producer.join().expect("producer");
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_channel_throughput);
criterion_main!(benches);
