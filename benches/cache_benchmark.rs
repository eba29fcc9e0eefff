use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kbfs_blockcache::cache::metrics::MetricsCollector;
use kbfs_blockcache::identity;
use kbfs_blockcache::{BlockCache, BlockId, CallContext, MemoryBlockCache, ServerHalf, TlfId, TlfType};
use std::time::Duration;

fn benchmark_identity(c: &mut Criterion) {
    c.bench_function("uid_derive", |b| {
        b.iter(|| {
            let uid = identity::derive(black_box("SomeUser_42"));
            black_box(uid);
        });
    });

    c.bench_function("uid_validate", |b| {
        let uid = identity::derive("someuser_42");
        b.iter(|| {
            black_box(identity::validate(black_box(&uid), black_box("someuser_42")).is_ok());
        });
    });

    c.bench_function("uid_parse", |b| {
        let s = identity::derive("someuser_42").to_string();
        b.iter(|| {
            black_box(s.parse::<identity::Uid>().is_ok());
        });
    });
}

fn benchmark_block_ids(c: &mut Criterion) {
    c.bench_function("block_id_from_contents_64k", |b| {
        let data = vec![0u8; 64 * 1024];
        b.iter(|| {
            let id = BlockId::from_contents(black_box(&data));
            black_box(id);
        });
    });
}

fn benchmark_memory_cache(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let cache = MemoryBlockCache::new(64 * 1024 * 1024);
    let ctx = CallContext::background();
    let tlf = TlfId::random(TlfType::Private);
    let data = vec![1u8; 16 * 1024];
    let id = BlockId::from_contents(&data);
    runtime
        .block_on(cache.put(&ctx, &tlf, &id, &data, &ServerHalf::random()))
        .unwrap();

    c.bench_function("memory_cache_get_16k", |b| {
        b.iter(|| {
            let block = runtime.block_on(cache.get(&ctx, &tlf, black_box(&id))).unwrap();
            black_box(block);
        });
    });
}

fn benchmark_metrics_collection(c: &mut Criterion) {
    c.bench_function("metrics_record_operations", |b| {
        let metrics = MetricsCollector::new();
        b.iter(|| {
            metrics.record_get(Duration::from_micros(150), Some(4096));
            metrics.record_put(Duration::from_micros(300), 4096, true);
        });
    });

    c.bench_function("metrics_snapshot", |b| {
        let metrics = MetricsCollector::new();
        for _ in 0..1000 {
            metrics.record_get(Duration::from_micros(150), Some(4096));
        }
        b.iter(|| {
            black_box(metrics.get_metrics());
        });
    });
}

criterion_group!(
    benches,
    benchmark_identity,
    benchmark_block_ids,
    benchmark_memory_cache,
    benchmark_metrics_collection
);
criterion_main!(benches);
