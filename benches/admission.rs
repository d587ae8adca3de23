//! Benchmarks for local admission and the full pipeline.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skp_admission::{
    AdmissionPipeline, EngineConfig, LimiterPolicy, LocalLimiterEngine, PartitionKey, PolicyTable,
    RequestContext, SystemClock,
};
use tokio::runtime::Runtime;

fn table() -> Arc<PolicyTable> {
    let policies = [
        LimiterPolicy::fixed_window("fixed", 1_000_000, Duration::from_secs(60)),
        LimiterPolicy::sliding_window("sliding", 1_000_000, Duration::from_secs(60), 6),
        LimiterPolicy::token_bucket("bucket", 1_000_000, 1_000_000, Duration::from_secs(1)),
    ];
    Arc::new(PolicyTable::from_policies(policies).unwrap())
}

fn engine() -> Arc<LocalLimiterEngine> {
    Arc::new(LocalLimiterEngine::with_config(
        table(),
        SystemClock::new(),
        EngineConfig::manual(),
    ))
}

fn bench_engine(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine");

    for policy in ["fixed", "sliding", "bucket"] {
        group.bench_function(policy, |b| {
            let engine = engine();
            let keys: Vec<_> = (0..100).map(|i| PartitionKey::new(format!("k:{}", i))).collect();
            let mut i = 0usize;
            b.iter(|| {
                i += 1;
                let key = &keys[i % keys.len()];
                rt.block_on(async { black_box(engine.acquire(policy, key).await) })
            })
        });
    }

    group.finish();
}

fn bench_partition_count(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("partition_count");

    for num_keys in [1usize, 10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("fixed", num_keys), num_keys, |b, &num_keys| {
            let engine = engine();
            let keys: Vec<_> = (0..num_keys).map(|i| PartitionKey::new(format!("k:{}", i))).collect();
            let mut i = 0usize;
            b.iter(|| {
                i += 1;
                rt.block_on(async { black_box(engine.acquire("fixed", &keys[i % num_keys]).await) })
            })
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pipeline = AdmissionPipeline::builder()
        .engine(engine())
        .global_policy("bucket")
        .build()
        .unwrap();

    let mut group = c.benchmark_group("pipeline");

    group.bench_function("global_only", |b| {
        let ctx = RequestContext::new().with_api_key("abc123");
        b.iter(|| rt.block_on(async { black_box(pipeline.evaluate(&ctx).await) }))
    });

    group.bench_function("global_and_two_endpoint", |b| {
        let ctx = RequestContext::new()
            .with_subject("alice")
            .with_policies(["fixed", "sliding"]);
        b.iter(|| rt.block_on(async { black_box(pipeline.evaluate(&ctx).await) }))
    });

    group.finish();
}

criterion_group!(benches, bench_engine, bench_partition_count, bench_pipeline);
criterion_main!(benches);
