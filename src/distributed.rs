//! Distributed counter client.
//!
//! Enforces fixed-window policies across every instance that shares one
//! counter store. Each `(policy, partition)` pair maps to one counter whose
//! TTL is the window: the first increment opens the window and the counter
//! expiring closes it.
//!
//! Every store call carries a deadline. What happens when the store does not
//! answer in time is a deployment decision, so [`DistributedConfig`] has no
//! default failure policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::PolicyTable;
use crate::decision::Lease;
use crate::error::{AdmissionError, ConfigError, ConnectionError, Result};
use crate::key::PartitionKey;
use crate::policy::PolicyKind;
use crate::storage::CounterStore;

/// What to decide when the counter store is unreachable or too slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit the request; availability over strictness.
    FailOpen,
    /// Reject the request; strictness over availability.
    FailClosed,
}

/// Distributed client configuration.
#[derive(Debug, Clone)]
pub struct DistributedConfig {
    /// Prefix for counter keys.
    pub key_prefix: String,
    /// Deadline for one acquisition, store round-trips included.
    pub deadline: Duration,
    /// Decision when the deadline passes or the store fails transiently.
    pub on_failure: FailurePolicy,
}

impl DistributedConfig {
    /// Create a configuration. Both parameters are required.
    pub fn new(deadline: Duration, on_failure: FailurePolicy) -> Self {
        Self {
            key_prefix: String::new(),
            deadline,
            on_failure,
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Client for policies enforced through a shared counter store.
#[derive(Debug)]
pub struct DistributedCounterClient<S> {
    store: S,
    table: Arc<PolicyTable>,
    config: DistributedConfig,
}

impl<S: CounterStore> DistributedCounterClient<S> {
    /// Create a client over `store`. Limits default to the table's values.
    pub fn new(store: S, table: Arc<PolicyTable>, config: DistributedConfig) -> Self {
        Self {
            store,
            table,
            config,
        }
    }

    /// Charge one request to `policy` for `partition`.
    pub async fn acquire(&self, policy: &str, partition: &PartitionKey) -> Result<Lease> {
        let (limit, window) = self.local_limit(policy)?;
        let deadline = self.config.deadline;

        match tokio::time::timeout(deadline, self.charge(policy, partition, limit, window)).await {
            Ok(Ok(lease)) => Ok(lease),
            Ok(Err(e)) if e.is_retryable() => Ok(self.on_failure(policy, limit, window, &e)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let e = AdmissionError::from(ConnectionError::Timeout(deadline));
                Ok(self.on_failure(policy, limit, window, &e))
            }
        }
    }

    /// Requests counted so far in the partition's current window.
    pub async fn peek(&self, policy: &str, partition: &PartitionKey) -> Result<u64> {
        self.local_limit(policy)?;
        let key = self.counter_key(policy, partition);
        match tokio::time::timeout(self.config.deadline, self.store.peek(&key)).await {
            Ok(count) => Ok(count?.unwrap_or(0)),
            Err(_) => Err(ConnectionError::Timeout(self.config.deadline).into()),
        }
    }

    /// Store key of a partition's counter.
    pub fn counter_key(&self, policy: &str, partition: &PartitionKey) -> String {
        format!("{}{}:{}", self.config.key_prefix, policy, partition)
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Client configuration.
    pub fn config(&self) -> &DistributedConfig {
        &self.config
    }

    fn local_limit(&self, policy: &str) -> Result<(u64, Duration)> {
        let found = self
            .table
            .get(policy)
            .ok_or_else(|| AdmissionError::UnknownPolicy(policy.to_string()))?;
        match *found.kind() {
            PolicyKind::FixedWindow { permit_limit, window } => Ok((permit_limit, window)),
            _ => Err(ConfigError::invalid(policy, "only fixed_window policies can be distributed").into()),
        }
    }

    async fn charge(
        &self,
        policy: &str,
        partition: &PartitionKey,
        limit: u64,
        window: Duration,
    ) -> Result<Lease> {
        // Shared limits win over the local table so an operator can retune
        // every instance at once.
        let (limit, window) = match self.store.get_limit(policy).await? {
            Some(shared) => (shared.limit, shared.window),
            None => (limit, window),
        };

        let key = self.counter_key(policy, partition);
        let counter = self.store.increment_with_expiry(&key, window).await?;

        if counter.count <= limit {
            Ok(Lease::granted(limit, limit - counter.count, counter.ttl))
        } else {
            Ok(Lease::rejected(limit, counter.ttl, counter.ttl))
        }
    }

    fn on_failure(&self, policy: &str, limit: u64, window: Duration, error: &AdmissionError) -> Lease {
        match self.config.on_failure {
            FailurePolicy::FailOpen => {
                warn!(policy, error = %error, "counter store unavailable, failing open");
                Lease::granted(limit, limit, window)
            }
            FailurePolicy::FailClosed => {
                warn!(policy, error = %error, "counter store unavailable, failing closed");
                Lease::rejected(limit, window, window)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StorageError;
    use crate::policy::{LimiterPolicy, PolicyScope};
    use crate::storage::{CounterSnapshot, MemoryCounterStore, SharedLimit};

    fn table() -> Arc<PolicyTable> {
        let policy = LimiterPolicy::fixed_window("RedisLimiter", 2, Duration::from_secs(60))
            .with_scope(PolicyScope::Distributed);
        Arc::new(PolicyTable::from_policies([policy]).unwrap())
    }

    fn config(on_failure: FailurePolicy) -> DistributedConfig {
        DistributedConfig::new(Duration::from_millis(50), on_failure)
    }

    struct FailingStore {
        retryable: bool,
    }

    impl CounterStore for FailingStore {
        async fn increment_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<CounterSnapshot> {
            Err(StorageError::operation_failed("connection reset", self.retryable).into())
        }

        async fn peek(&self, _key: &str) -> Result<Option<u64>> {
            Ok(None)
        }

        async fn get_limit(&self, _policy: &str) -> Result<Option<SharedLimit>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_counts_against_limit() {
        let clock = ManualClock::new();
        let store = MemoryCounterStore::with_clock(clock.clone());
        let client = DistributedCounterClient::new(store, table(), config(FailurePolicy::FailClosed));
        let partition = PartitionKey::new("ip:10.0.0.1");

        assert!(client.acquire("RedisLimiter", &partition).await.unwrap().granted);
        assert!(client.acquire("RedisLimiter", &partition).await.unwrap().granted);

        clock.advance(Duration::from_secs(15));
        let lease = client.acquire("RedisLimiter", &partition).await.unwrap();
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(Duration::from_secs(45)));
        assert_eq!(client.peek("RedisLimiter", &partition).await.unwrap(), 3);

        clock.advance(Duration::from_secs(45));
        assert!(client.acquire("RedisLimiter", &partition).await.unwrap().granted);
    }

    #[tokio::test]
    async fn test_shared_limit_overrides_table() {
        let store = MemoryCounterStore::with_clock(ManualClock::new());
        store.set_limit(
            "RedisLimiter",
            SharedLimit {
                limit: 1,
                window: Duration::from_secs(10),
            },
        );
        let client = DistributedCounterClient::new(store, table(), config(FailurePolicy::FailClosed));
        let partition = PartitionKey::anonymous();

        let lease = client.acquire("RedisLimiter", &partition).await.unwrap();
        assert!(lease.granted);
        assert_eq!(lease.limit, 1);
        assert_eq!(lease.reset, Duration::from_secs(10));
        assert!(!client.acquire("RedisLimiter", &partition).await.unwrap().granted);
    }

    #[tokio::test]
    async fn test_counter_key_layout() {
        let client = DistributedCounterClient::new(
            MemoryCounterStore::new(),
            table(),
            config(FailurePolicy::FailOpen).with_key_prefix("rl:"),
        );
        assert_eq!(
            client.counter_key("RedisLimiter", &PartitionKey::new("key:abc")),
            "rl:RedisLimiter:key:abc"
        );
    }

    #[tokio::test]
    async fn test_retryable_failure_uses_policy() {
        let partition = PartitionKey::anonymous();

        let open = DistributedCounterClient::new(
            FailingStore { retryable: true },
            table(),
            config(FailurePolicy::FailOpen),
        );
        let lease = open.acquire("RedisLimiter", &partition).await.unwrap();
        assert!(lease.granted);
        assert_eq!(lease.remaining, 2);

        let closed = DistributedCounterClient::new(
            FailingStore { retryable: true },
            table(),
            config(FailurePolicy::FailClosed),
        );
        let lease = closed.acquire("RedisLimiter", &partition).await.unwrap();
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_propagates() {
        let client = DistributedCounterClient::new(
            FailingStore { retryable: false },
            table(),
            config(FailurePolicy::FailOpen),
        );
        let err = client
            .acquire("RedisLimiter", &PartitionKey::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Storage(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_non_window_policies() {
        let table = Arc::new(
            PolicyTable::from_policies([LimiterPolicy::token_bucket(
                "Bucket",
                1,
                1,
                Duration::from_secs(1),
            )])
            .unwrap(),
        );
        let client = DistributedCounterClient::new(
            MemoryCounterStore::new(),
            table,
            config(FailurePolicy::FailOpen),
        );
        let partition = PartitionKey::anonymous();

        assert!(matches!(
            client.acquire("Missing", &partition).await,
            Err(AdmissionError::UnknownPolicy(_))
        ));
        assert!(matches!(
            client.acquire("Bucket", &partition).await,
            Err(AdmissionError::Config(_))
        ));
    }
}
