//! In-memory counter store.
//!
//! Shares counters between every client in one process. Useful for tests and
//! single-instance deployments of distributed policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::storage::{CounterSnapshot, CounterStore, SharedLimit};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Duration,
}

/// In-memory counter store.
///
/// Uses `DashMap` so increments on one key are atomic with respect to each
/// other. Expired counters are dropped lazily on access or by [`purge_expired`].
///
/// # Example
///
/// ```ignore
/// use skp_admission::storage::{MemoryCounterStore, SharedLimit};
/// use std::time::Duration;
///
/// let store = MemoryCounterStore::new();
/// store.set_limit("RedisLimiter", SharedLimit { limit: 50, window: Duration::from_secs(60) });
/// ```
///
/// [`purge_expired`]: MemoryCounterStore::purge_expired
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    limits: DashMap<String, SharedLimit>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCounterStore")
            .field("counters", &self.counters.len())
            .field("limits", &self.limits.len())
            .finish()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }

    /// Create a store on the given clock.
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            counters: DashMap::new(),
            limits: DashMap::new(),
            clock: Arc::new(clock),
        }
    }

    /// Publish a shared limit for a policy.
    pub fn set_limit(&self, policy: impl Into<String>, limit: SharedLimit) {
        self.limits.insert(policy.into(), limit);
    }

    /// Withdraw a policy's shared limit.
    pub fn remove_limit(&self, policy: &str) {
        self.limits.remove(policy);
    }

    /// Drop expired counters. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        before.saturating_sub(self.counters.len())
    }

    /// Get the number of counters currently stored.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl CounterStore for MemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        let now = self.clock.now();

        let counter = *self
            .counters
            .entry(key.to_string())
            .and_modify(|counter| {
                if counter.expires_at <= now {
                    counter.count = 1;
                    counter.expires_at = now + ttl;
                } else {
                    counter.count += 1;
                }
            })
            .or_insert_with(|| Counter {
                count: 1,
                expires_at: now + ttl,
            });

        Ok(CounterSnapshot {
            count: counter.count,
            ttl: counter.expires_at.saturating_sub(now),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<u64>> {
        let now = self.clock.now();
        Ok(self
            .counters
            .get(key)
            .filter(|counter| counter.expires_at > now)
            .map(|counter| counter.count))
    }

    async fn get_limit(&self, policy: &str) -> Result<Option<SharedLimit>> {
        Ok(self.limits.get(policy).map(|limit| *limit))
    }
}
