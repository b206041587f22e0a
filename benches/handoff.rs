use conveyor::{BlockingQueue, BlockingTripleBuffer, Channel, LockFreeTripleBuffer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::thread;

fn benchmark_same_thread_cycle(c: &mut Criterion) {
    let queue: BlockingQueue<u64> = Channel::new();
    c.bench_function("handoff_queue_cycle", |b| {
        b.iter(|| {
            queue.push(black_box(1));
            black_box(queue.pop());
        });
    });

    let triple: BlockingTripleBuffer<u64> = Channel::new();
    c.bench_function("handoff_triple_buffer_cycle", |b| {
        b.iter(|| {
            triple.push(black_box(1));
            black_box(triple.pop());
        });
    });

    let lock_free: LockFreeTripleBuffer<u64> = Channel::new();
    c.bench_function("handoff_lock_free_cycle", |b| {
        b.iter(|| {
            lock_free.push(black_box(1));
            black_box(lock_free.pop());
        });
    });
}

fn benchmark_cross_thread_stream(c: &mut Criterion) {
    c.bench_function("handoff_queue_cross_thread_100k", |b| {
        b.iter(|| {
            let channel: Arc<BlockingQueue<u64>> = Arc::new(Channel::new());
            let producer = {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..100_000u64 {
                        channel.push(i);
                    }
                })
            };
            for _ in 0..100_000 {
                black_box(channel.pop());
            }
            producer.join().expect("producer thread");
        });
    });

    c.bench_function("handoff_lock_free_cross_thread_100k", |b| {
        b.iter(|| {
            let channel: Arc<LockFreeTripleBuffer<u64>> = Arc::new(Channel::new());
            let producer = {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 1..=100_000u64 {
                        channel.push(i);
                    }
                })
            };
            // Latest-wins: read until the final value has been observed.
            let mut last = 0;
            while last != 100_000 {
                last = channel.pop();
            }
            producer.join().expect("producer thread");
        });
    });
}

criterion_group!(benches, benchmark_same_thread_cycle, benchmark_cross_thread_stream);
criterion_main!(benches);
