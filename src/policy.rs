//! Limiter policy configuration.
//!
//! A [`LimiterPolicy`] names one quota: which algorithm enforces it, its
//! limits, how callers are partitioned, whether it is enforced locally or
//! across instances, and how over-limit requests may queue.
//!
//! # Examples
//!
//! ```ignore
//! use skp_admission::policy::{LimiterPolicy, QueueOrder};
//! use std::time::Duration;
//!
//! // 3 login attempts per minute
//! let login = LimiterPolicy::fixed_window("LoginLimiter", 3, Duration::from_secs(60));
//!
//! // 5 calls per minute, tracked in 3 segments
//! let weather = LimiterPolicy::sliding_window("WeatherLimiter", 5, Duration::from_secs(60), 3);
//!
//! // Burst of 10, 10 more every 10 seconds, up to 4 queued callers
//! let global = LimiterPolicy::token_bucket("Global", 10, 10, Duration::from_secs(10))
//!     .with_queue(4, QueueOrder::OldestFirst);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::key::PartitionStrategy;

/// Algorithm and limits of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// At most `permit_limit` grants per `window`, window restarting on first use after expiry.
    FixedWindow {
        /// Grants per window.
        permit_limit: u64,
        /// Window length.
        window: Duration,
    },
    /// At most `permit_limit` grants in the trailing `window`, tracked in `segments` buckets.
    SlidingWindow {
        /// Grants per trailing window.
        permit_limit: u64,
        /// Window length.
        window: Duration,
        /// Number of segments the window is divided into.
        segments: u32,
    },
    /// Bucket of `token_limit` tokens refilled by `tokens_per_period` every `replenishment_period`.
    TokenBucket {
        /// Bucket capacity.
        token_limit: u64,
        /// Tokens added per period.
        tokens_per_period: u64,
        /// Refill period.
        replenishment_period: Duration,
    },
}

impl PolicyKind {
    /// Short algorithm name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedWindow { .. } => "fixed_window",
            Self::SlidingWindow { .. } => "sliding_window",
            Self::TokenBucket { .. } => "token_bucket",
        }
    }

    /// Maximum grants the policy can hand out at once.
    pub fn limit(&self) -> u64 {
        match self {
            Self::FixedWindow { permit_limit, .. } | Self::SlidingWindow { permit_limit, .. } => {
                *permit_limit
            }
            Self::TokenBucket { token_limit, .. } => *token_limit,
        }
    }

    /// The window (or refill period) the policy measures over.
    pub fn period(&self) -> Duration {
        match self {
            Self::FixedWindow { window, .. } | Self::SlidingWindow { window, .. } => *window,
            Self::TokenBucket {
                replenishment_period,
                ..
            } => *replenishment_period,
        }
    }
}

/// Which waiter is released first when capacity frees up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Release in arrival order; a full queue rejects newcomers.
    #[default]
    OldestFirst,
    /// Release the most recent arrival; a full queue evicts its oldest waiter.
    NewestFirst,
}

/// Where a policy's counters live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// In this process, exact under concurrency.
    #[default]
    Local,
    /// In a shared counter store, one budget across all instances.
    Distributed,
}

/// Queueing options for requests that arrive while the policy is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum waiters per partition. Zero disables queueing.
    pub limit: usize,
    /// Release order.
    pub order: QueueOrder,
    /// Maximum wait; defaults to the policy's window or refill period.
    pub timeout: Option<Duration>,
}

/// A named, immutable admission policy.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterPolicy {
    name: String,
    kind: PolicyKind,
    queue: QueueOptions,
    scope: PolicyScope,
    partition: PartitionStrategy,
}

impl LimiterPolicy {
    /// Create a policy of the given kind with no queue, local scope and caller partitioning.
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            queue: QueueOptions::default(),
            scope: PolicyScope::Local,
            partition: PartitionStrategy::Caller,
        }
    }

    /// Create a fixed window policy.
    pub fn fixed_window(name: impl Into<String>, permit_limit: u64, window: Duration) -> Self {
        Self::new(name, PolicyKind::FixedWindow { permit_limit, window })
    }

    /// Create a sliding window policy.
    pub fn sliding_window(
        name: impl Into<String>,
        permit_limit: u64,
        window: Duration,
        segments: u32,
    ) -> Self {
        Self::new(
            name,
            PolicyKind::SlidingWindow {
                permit_limit,
                window,
                segments,
            },
        )
    }

    /// Create a token bucket policy. The bucket starts full.
    pub fn token_bucket(
        name: impl Into<String>,
        token_limit: u64,
        tokens_per_period: u64,
        replenishment_period: Duration,
    ) -> Self {
        Self::new(
            name,
            PolicyKind::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            },
        )
    }

    /// Allow up to `limit` requests per partition to wait for capacity.
    pub fn with_queue(mut self, limit: usize, order: QueueOrder) -> Self {
        self.queue.limit = limit;
        self.queue.order = order;
        self
    }

    /// Set the maximum time a queued request waits.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue.timeout = Some(timeout);
        self
    }

    /// Set where the counters live.
    pub fn with_scope(mut self, scope: PolicyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set how callers are partitioned.
    pub fn with_partition(mut self, partition: PartitionStrategy) -> Self {
        self.partition = partition;
        self
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Algorithm and limits.
    pub fn kind(&self) -> &PolicyKind {
        &self.kind
    }

    /// Queue options.
    pub fn queue(&self) -> &QueueOptions {
        &self.queue
    }

    /// Effective maximum wait for a queued request.
    pub fn queue_timeout(&self) -> Duration {
        self.queue.timeout.unwrap_or_else(|| self.kind.period())
    }

    /// Where the counters live.
    pub fn scope(&self) -> PolicyScope {
        self.scope
    }

    /// How callers are partitioned.
    pub fn partition(&self) -> PartitionStrategy {
        self.partition
    }

    /// Check the policy's parameters.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.trim().is_empty() {
            return Err(ConfigError::MissingRequired("policy name".into()).into());
        }

        match self.kind {
            PolicyKind::FixedWindow { permit_limit, window } => {
                check_limit(name, "permit_limit", permit_limit)?;
                check_period(name, "window", window)?;
            }
            PolicyKind::SlidingWindow {
                permit_limit,
                window,
                segments,
            } => {
                check_limit(name, "permit_limit", permit_limit)?;
                check_period(name, "window", window)?;
                if segments == 0 {
                    return Err(ConfigError::invalid(name, "segments must be greater than 0").into());
                }
                if (window / segments).is_zero() {
                    return Err(ConfigError::invalid(name, "window is too short for its segments").into());
                }
            }
            PolicyKind::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            } => {
                check_limit(name, "token_limit", token_limit)?;
                check_limit(name, "tokens_per_period", tokens_per_period)?;
                check_period(name, "replenishment_period", replenishment_period)?;
            }
        }

        if let Some(timeout) = self.queue.timeout {
            if timeout.is_zero() && self.queue.limit > 0 {
                return Err(ConfigError::invalid(name, "queue_timeout must be non-zero").into());
            }
        }

        if self.scope == PolicyScope::Distributed {
            if !matches!(self.kind, PolicyKind::FixedWindow { .. }) {
                return Err(ConfigError::invalid(
                    name,
                    "only fixed_window policies can be distributed",
                )
                .into());
            }
            if self.queue.limit > 0 {
                return Err(ConfigError::invalid(name, "distributed policies cannot queue").into());
            }
            // Store keys are `{policy}:{partition}` and `policy:{name}`.
            if name.contains(':') {
                return Err(
                    ConfigError::invalid(name, "distributed policy names cannot contain ':'").into(),
                );
            }
            if name == "policy" {
                return Err(ConfigError::invalid(name, "\"policy\" is reserved for shared limits").into());
            }
        }

        Ok(())
    }
}

fn check_limit(name: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::invalid(name, format!("{} must be greater than 0", field)).into());
    }
    Ok(())
}

fn check_period(name: &str, field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(name, format!("{} must be non-zero", field)).into());
    }
    Ok(())
}
