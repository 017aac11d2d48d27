use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::join_all;
use pinpool::{PoolConfig, ThreadPool};
use std::{convert::Infallible, sync::Arc};
use tokio::runtime::Builder;

// Number of calls issued per benchmark iteration.
const TOTAL_CALLS: usize = 1024;

/// Round-trip cost of a trivial task, one call at a time.
fn bench_sequential(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .expect("failed to build runtime");
    let pool = ThreadPool::with_config(PoolConfig::new(1).with_parallelism(2))
        .expect("failed to build pool");

    let mut group = c.benchmark_group("sequential");
    group.throughput(Throughput::Elements(TOTAL_CALLS as u64));
    group.bench_function(format!("elems/{TOTAL_CALLS}"), |b| {
        b.to_async(&rt).iter(|| async {
            for i in 0..TOTAL_CALLS {
                let value = pool.call(move || Ok::<_, Infallible>(i)).await;
                black_box(value.ok());
            }
        });
    });
    group.finish();

    rt.block_on(pool.stop_and_wait());
}

/// Throughput when many callers contend for a few workers.
fn bench_contended(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .expect("failed to build runtime");

    for num_threads in [1, 2, 4] {
        let Ok(pool) = ThreadPool::with_config(
            PoolConfig::new(num_threads).with_parallelism(num_threads + 1),
        ) else {
            continue;
        };
        let pool = Arc::new(pool);

        let mut group = c.benchmark_group(format!("contended/threads_{num_threads}"));
        group.throughput(Throughput::Elements(TOTAL_CALLS as u64));
        group.bench_function(format!("elems/{TOTAL_CALLS}"), |b| {
            b.to_async(&rt).iter(|| {
                let pool = Arc::clone(&pool);
                async move {
                    let calls = (0..TOTAL_CALLS).map(|i| {
                        let pool = Arc::clone(&pool);
                        async move { pool.call(move || Ok::<_, Infallible>(i)).await }
                    });
                    black_box(join_all(calls).await);
                }
            });
        });
        group.finish();

        rt.block_on(pool.stop_and_wait());
    }
}

criterion_group!(benches, bench_sequential, bench_contended);
criterion_main!(benches);
