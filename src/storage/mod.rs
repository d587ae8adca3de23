//! Counter store trait and implementations.
//!
//! This module defines the `CounterStore` trait behind distributed policies,
//! along with built-in implementations for in-memory and Redis storage.

mod memory;
#[cfg(feature = "redis")]
mod redis_cluster;

pub use memory::MemoryCounterStore;

// RedisCounterStore with connection pooling
#[cfg(feature = "redis")]
pub use redis_cluster::{RedisConfig, RedisCounterStore};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Counter value right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count after incrementing.
    pub count: u64,
    /// Time until the counter expires.
    pub ttl: Duration,
}

/// Limit for a policy as published in shared configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedLimit {
    /// Grants per window.
    pub limit: u64,
    /// Window length.
    pub window: Duration,
}

/// Shared atomic counter store for distributed policies.
///
/// All operations are async to support both local and remote backends.
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Required Operations
///
/// - `increment_with_expiry`: increment a counter and, on the first increment
///   of its window, set its expiry, as one atomic step
/// - `peek`: read a counter without changing it
/// - `get_limit`: read a policy's shared limit, if one is published
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically increment `key` and return the post-increment value.
    ///
    /// When the increment creates the counter, its TTL is set to `ttl`. Further
    /// increments leave the TTL alone, so the window closes `ttl` after the
    /// first request in it.
    fn increment_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<CounterSnapshot>> + Send;

    /// Current value of `key`, or `None` if it doesn't exist or has expired.
    fn peek(&self, key: &str) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Shared limit of `policy`, or `None` to use the local policy table.
    fn get_limit(&self, policy: &str) -> impl Future<Output = Result<Option<SharedLimit>>> + Send;
}

impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        (**self).increment_with_expiry(key, ttl).await
    }

    async fn peek(&self, key: &str) -> Result<Option<u64>> {
        (**self).peek(key).await
    }

    async fn get_limit(&self, policy: &str) -> Result<Option<SharedLimit>> {
        (**self).get_limit(policy).await
    }
}
