//! Integration tests for the local limiter engine under concurrency.

use std::sync::Arc;
use std::time::Duration;

use skp_admission::{
    EngineConfig, LimiterPolicy, LocalLimiterEngine, ManualClock, PartitionKey, PolicyTable,
    QueueOrder, SystemClock,
};

fn engine(policies: Vec<LimiterPolicy>) -> Arc<LocalLimiterEngine> {
    let table = PolicyTable::from_policies(policies).unwrap();
    Arc::new(LocalLimiterEngine::with_config(
        Arc::new(table),
        ManualClock::new(),
        EngineConfig::manual(),
    ))
}

async fn race(engine: &Arc<LocalLimiterEngine>, policy: &str, partition: &str, n: usize) -> usize {
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let engine = Arc::clone(engine);
        let policy = policy.to_string();
        let partition = PartitionKey::new(partition);
        handles.push(tokio::spawn(async move {
            engine.acquire(&policy, &partition).await.unwrap().granted
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }
    granted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_acquisitions_exact_fixed_window() {
    let engine = engine(vec![LimiterPolicy::fixed_window("login", 10, Duration::from_secs(60))]);
    assert_eq!(race(&engine, "login", "sub:alice", 200).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_acquisitions_exact_sliding_window() {
    let engine = engine(vec![LimiterPolicy::sliding_window(
        "weather",
        7,
        Duration::from_secs(60),
        3,
    )]);
    assert_eq!(race(&engine, "weather", "sub:alice", 150).await, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_acquisitions_exact_token_bucket() {
    let engine = engine(vec![LimiterPolicy::token_bucket(
        "global",
        25,
        25,
        Duration::from_secs(10),
    )]);
    assert_eq!(race(&engine, "global", "key:abc", 300).await, 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distinct_partitions_do_not_interfere() {
    let engine = engine(vec![LimiterPolicy::fixed_window("login", 5, Duration::from_secs(60))]);

    let mut tasks = Vec::new();
    for user in 0..20 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            race(&engine, "login", &format!("sub:user{}", user), 12).await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 5);
    }
    assert_eq!(engine.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_concurrent_with_acquire_keeps_counts_exact() {
    let engine = engine(vec![LimiterPolicy::fixed_window("login", 10, Duration::from_secs(60))]);

    let sweeper = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..200 {
                engine.sweep();
                tokio::task::yield_now().await;
            }
        })
    };

    assert_eq!(race(&engine, "login", "sub:alice", 100).await, 10);
    sweeper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_queue_never_exceeds_limit() {
    let policy = LimiterPolicy::token_bucket("bucket", 1, 1, Duration::from_secs(1))
        .with_queue(3, QueueOrder::OldestFirst)
        .with_queue_timeout(Duration::from_secs(30));
    let table = PolicyTable::from_policies([policy]).unwrap();
    let engine = Arc::new(LocalLimiterEngine::with_config(
        Arc::new(table),
        SystemClock::new(),
        EngineConfig::manual(),
    ));
    let partition = PartitionKey::new("sub:alice");

    engine.acquire("bucket", &partition).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = Arc::clone(&engine);
        let partition = partition.clone();
        handles.push(tokio::spawn(async move {
            engine.acquire("bucket", &partition).await.unwrap().granted
        }));
    }
    tokio::task::yield_now().await;
    assert!(engine.queued("bucket", &partition) <= 3);

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 3);
}
