//! Request admission control for HTTP services.
//!
//! `skp_admission` decides whether an incoming request may proceed, based on
//! named quota policies scoped to a partition (API key, authenticated
//! subject, or remote address):
//!
//! - **Three Algorithms**: Fixed Window, Sliding Window, Token Bucket
//! - **Exact Local Counting**: per-partition locking, optional bounded queueing
//! - **Distributed Policies**: shared counters in Redis with an explicit failure policy
//! - **Pipeline**: a global policy plus per-route endpoint policies in one decision
//! - **Rendering**: 429 responses with `X-Rate-Limit-*` and `Retry-After` headers
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use skp_admission::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let table = Arc::new(PolicyTable::from_json(r#"{
//!         "Global": { "kind": "token_bucket", "token_limit": 10, "tokens_per_period": 10,
//!                     "replenishment_period_ms": 10000 },
//!         "LoginLimiter": { "kind": "fixed_window", "permit_limit": 3, "window_ms": 60000 }
//!     }"#)?);
//!
//!     let routes = RouteTable::builder()
//!         .global_policy("Global")
//!         .route("/api/auth/login", ["LoginLimiter"])
//!         .build(&table)?;
//!
//!     let pipeline = AdmissionPipeline::builder()
//!         .engine(Arc::new(LocalLimiterEngine::new(table)))
//!         .global_policy("Global")
//!         .build()?;
//!
//!     let ctx = routes.apply("/api/auth/login", RequestContext::new().with_api_key("abc123"));
//!     let result = pipeline.evaluate(&ctx).await?;
//!
//!     if result.is_rejected() {
//!         let response = RejectionHandler::new().render(&result);
//!         println!("{} {}", response.status, response.body);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Best For | Boundary burst |
//! |-----------|----------|----------------|
//! | Fixed Window | Simple use cases, distributed counters | up to 2x limit |
//! | Sliding Window | General purpose | reduced |
//! | Token Bucket | Bursty traffic | bounded by capacity |
//!
//! # Feature Flags
//!
//! - `redis`: Redis counter store for distributed policies

pub mod algorithm;
pub mod clock;
pub mod config;
pub mod decision;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod headers;
pub mod key;
pub mod pipeline;
pub mod policy;
pub mod rejection;
pub mod routes;
pub mod storage;

// Re-export main types
pub use algorithm::{Algorithm, FixedWindow, Limiter, SlidingWindow, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PolicySpec, PolicyTable};
pub use decision::{AdmissionResult, AdmissionSummary, Lease};
pub use distributed::{DistributedConfig, DistributedCounterClient, FailurePolicy};
pub use engine::{EngineConfig, LocalLimiterEngine, SweepInterval};
pub use error::{AdmissionError, ConfigError, ConnectionError, Result, StorageError};
pub use headers::RateLimitHeaders;
pub use key::{PartitionKey, PartitionKeyResolver, PartitionStrategy, RequestContext};
pub use pipeline::{AdmissionPipeline, AdmissionPipelineBuilder};
pub use policy::{LimiterPolicy, PolicyKind, PolicyScope, QueueOptions, QueueOrder};
pub use rejection::{RejectionBody, RejectionHandler, ResponseSpec};
pub use routes::{RouteTable, RouteTableBuilder};
pub use storage::{CounterSnapshot, CounterStore, MemoryCounterStore, SharedLimit};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisCounterStore};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::PolicyTable;
    pub use crate::decision::{AdmissionResult, Lease};
    pub use crate::distributed::{DistributedConfig, DistributedCounterClient, FailurePolicy};
    pub use crate::engine::{EngineConfig, LocalLimiterEngine};
    pub use crate::error::{AdmissionError, Result};
    pub use crate::key::{PartitionKey, RequestContext};
    pub use crate::pipeline::AdmissionPipeline;
    pub use crate::policy::{LimiterPolicy, QueueOrder};
    pub use crate::rejection::RejectionHandler;
    pub use crate::routes::RouteTable;
    pub use crate::storage::{CounterStore, MemoryCounterStore};

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisCounterStore};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    const POLICIES: &str = r#"{
        "Global": { "kind": "token_bucket", "token_limit": 10, "tokens_per_period": 10,
                    "replenishment_period_ms": 10000 },
        "LoginLimiter": { "kind": "fixed_window", "permit_limit": 3, "window_ms": 60000 },
        "WeatherLimiter": { "kind": "sliding_window", "permit_limit": 5, "window_ms": 60000,
                            "segments": 3 }
    }"#;

    #[tokio::test]
    async fn test_integration_login_flow() {
        let clock = crate::ManualClock::new();
        let table = Arc::new(PolicyTable::from_json(POLICIES).unwrap());
        let routes = RouteTable::builder()
            .global_policy("Global")
            .route("/api/auth/login", ["LoginLimiter"])
            .build(&table)
            .unwrap();
        let engine = LocalLimiterEngine::with_config(table, clock.clone(), EngineConfig::manual());
        let pipeline = AdmissionPipeline::builder()
            .engine(Arc::new(engine))
            .global_policy("Global")
            .build()
            .unwrap();

        let ctx = routes.apply(
            "/api/auth/login",
            RequestContext::new().with_remote_address("10.0.0.7".parse().unwrap()),
        );

        for i in 1..=3 {
            let result = pipeline.evaluate(&ctx).await.unwrap();
            assert!(result.granted, "Request {} should be granted", i);
        }

        clock.advance(Duration::from_secs(1));
        let result = pipeline.evaluate(&ctx).await.unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.policy.as_deref(), Some("LoginLimiter"));

        let response = RejectionHandler::new().render_at(&result, UNIX_EPOCH);
        assert_eq!(response.status, 429);
        assert_eq!(response.header("X-Rate-Limit-Reset"), Some("59"));
        assert_eq!(response.header("Retry-After"), Some("Thu, 01 Jan 1970 00:00:59 GMT"));
    }

    #[tokio::test]
    async fn test_integration_unrouted_path_only_global() {
        let table = Arc::new(PolicyTable::from_json(POLICIES).unwrap());
        let routes = RouteTable::builder().build(&table).unwrap();
        let pipeline = AdmissionPipeline::builder()
            .engine(Arc::new(LocalLimiterEngine::with_config(
                table,
                crate::ManualClock::new(),
                EngineConfig::manual(),
            )))
            .global_policy("Global")
            .build()
            .unwrap();

        let ctx = routes.apply("/health", RequestContext::new());
        let result = pipeline.evaluate(&ctx).await.unwrap();
        assert!(result.granted);
        assert_eq!(result.policy.as_deref(), Some("Global"));
        assert_eq!(result.remaining, 9);
    }
}
