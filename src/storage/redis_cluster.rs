//! Redis counter store for distributed policies.
//!
//! Uses connection pooling for high performance.

use std::time::Duration;

use deadpool_redis::{
    Config, Connection, Pool, PoolConfig, Runtime,
    redis::{AsyncCommands, RedisError, cmd},
};
use redis::Script;
use tracing::warn;

use crate::error::{ConnectionError, Result, StorageError};
use crate::storage::{CounterSnapshot, CounterStore, SharedLimit};

/// INCR and first-time PEXPIRE as one server-side step.
///
/// A counter that somehow lost its TTL is re-armed, so a key can never
/// outlive its window indefinitely.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Prefix for every key the store touches
    pub key_prefix: String,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis counter store.
///
/// Counters are plain integer keys. Shared limits are read from a hash per
/// policy, `{prefix}policy:{name}`, with fields `limit` and `window_seconds`,
/// so operators can change a limit for every instance at once.
///
/// # Example
///
/// ```ignore
/// use skp_admission::storage::{RedisConfig, RedisCounterStore};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let store = RedisCounterStore::new(config).await?;
/// ```
pub struct RedisCounterStore {
    pool: Pool,
    key_prefix: String,
    script: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCounterStore {
    /// Create a new Redis store from configuration.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Create a new Redis store from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Key of the hash holding a policy's shared limit.
    fn policy_key(&self, policy: &str) -> String {
        format!("{}policy:{}", self.key_prefix, policy)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted.into())
    }
}

fn store_error(e: RedisError) -> StorageError {
    let retryable = e.is_timeout() || e.is_io_error() || e.is_connection_dropped();
    StorageError::operation_failed(e.to_string(), retryable)
}

fn unexpected(key: &str, reply: impl std::fmt::Debug) -> StorageError {
    StorageError::UnexpectedReply {
        key: key.to_string(),
        reply: format!("{:?}", reply),
    }
}

impl CounterStore for RedisCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);

        let (count, pttl): (i64, i64) = self
            .script
            .key(&full_key)
            .arg(ttl_ms)
            .invoke_async(&mut *conn)
            .await
            .map_err(store_error)?;

        let count = u64::try_from(count).map_err(|_| unexpected(&full_key, count))?;
        let ttl = u64::try_from(pttl).map(Duration::from_millis).unwrap_or(ttl);
        Ok(CounterSnapshot { count, ttl })
    }

    async fn peek(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let value: Option<i64> = conn.get(&full_key).await.map_err(store_error)?;
        match value {
            Some(count) => u64::try_from(count)
                .map(Some)
                .map_err(|_| unexpected(&full_key, count).into()),
            None => Ok(None),
        }
    }

    async fn get_limit(&self, policy: &str) -> Result<Option<SharedLimit>> {
        let mut conn = self.get_conn().await?;
        let key = self.policy_key(policy);

        let (limit, window_seconds): (Option<u64>, Option<u64>) = cmd("HMGET")
            .arg(&key)
            .arg("limit")
            .arg("window_seconds")
            .query_async(&mut *conn)
            .await
            .map_err(store_error)?;

        match (limit, window_seconds) {
            (Some(limit), Some(window)) if limit > 0 && window > 0 => Ok(Some(SharedLimit {
                limit,
                window: Duration::from_secs(window),
            })),
            (None, None) => Ok(None),
            (limit, window) => {
                warn!(key = %key, ?limit, ?window, "ignoring incomplete shared limit");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("redis://localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5)
            .with_connection_timeout(Duration::from_secs(1));

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.connection_timeout, Duration::from_secs(1));
    }
}
