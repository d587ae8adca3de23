//! The policy table and its JSON format.
//!
//! The table is loaded once at startup and then shared read-only by the engine,
//! the distributed client and the pipeline. Any malformed entry fails the whole
//! load.
//!
//! ```json
//! {
//!   "LoginLimiter":   { "kind": "fixed_window", "permit_limit": 3, "window_ms": 60000 },
//!   "WeatherLimiter": { "kind": "sliding_window", "permit_limit": 5, "window_ms": 60000, "segments": 3 },
//!   "Global":         { "kind": "token_bucket", "token_limit": 10, "tokens_per_period": 10,
//!                       "replenishment_period_ms": 10000 }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, Result};
use crate::key::PartitionStrategy;
use crate::policy::{LimiterPolicy, PolicyKind, PolicyScope, QueueOrder};

/// Algorithm tag in the JSON format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKindTag {
    /// Fixed window.
    FixedWindow,
    /// Sliding window.
    SlidingWindow,
    /// Token bucket.
    TokenBucket,
}

/// One entry of the JSON policy table, before validation.
///
/// Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    /// Algorithm.
    pub kind: PolicyKindTag,
    /// Grants per window (fixed and sliding window).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit_limit: Option<u64>,
    /// Window length (fixed and sliding window).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    /// Segments per window (sliding window).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<u32>,
    /// Bucket capacity (token bucket).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
    /// Tokens per refill (token bucket).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_period: Option<u64>,
    /// Refill period (token bucket).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenishment_period_ms: Option<u64>,
    /// Waiters per partition.
    #[serde(default)]
    pub queue_limit: usize,
    /// Waiter release order.
    #[serde(default)]
    pub queue_order: QueueOrder,
    /// Maximum wait of a queued request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_ms: Option<u64>,
    /// Local or distributed counters.
    #[serde(default)]
    pub scope: PolicyScope,
    /// Partitioning strategy.
    #[serde(default)]
    pub partition: PartitionStrategy,
}

impl PolicySpec {
    /// Turn the raw entry into a validated policy.
    pub fn into_policy(self, name: &str) -> Result<LimiterPolicy> {
        let kind = match self.kind {
            PolicyKindTag::FixedWindow => {
                self.reject_fields(name, &[
                    ("segments", self.segments.is_some()),
                    ("token_limit", self.token_limit.is_some()),
                    ("tokens_per_period", self.tokens_per_period.is_some()),
                    ("replenishment_period_ms", self.replenishment_period_ms.is_some()),
                ])?;
                PolicyKind::FixedWindow {
                    permit_limit: required(name, "permit_limit", self.permit_limit)?,
                    window: millis(required(name, "window_ms", self.window_ms)?),
                }
            }
            PolicyKindTag::SlidingWindow => {
                self.reject_fields(name, &[
                    ("token_limit", self.token_limit.is_some()),
                    ("tokens_per_period", self.tokens_per_period.is_some()),
                    ("replenishment_period_ms", self.replenishment_period_ms.is_some()),
                ])?;
                PolicyKind::SlidingWindow {
                    permit_limit: required(name, "permit_limit", self.permit_limit)?,
                    window: millis(required(name, "window_ms", self.window_ms)?),
                    segments: required(name, "segments", self.segments)?,
                }
            }
            PolicyKindTag::TokenBucket => {
                self.reject_fields(name, &[
                    ("permit_limit", self.permit_limit.is_some()),
                    ("window_ms", self.window_ms.is_some()),
                    ("segments", self.segments.is_some()),
                ])?;
                PolicyKind::TokenBucket {
                    token_limit: required(name, "token_limit", self.token_limit)?,
                    tokens_per_period: required(name, "tokens_per_period", self.tokens_per_period)?,
                    replenishment_period: millis(required(
                        name,
                        "replenishment_period_ms",
                        self.replenishment_period_ms,
                    )?),
                }
            }
        };

        let mut policy = LimiterPolicy::new(name, kind)
            .with_queue(self.queue_limit, self.queue_order)
            .with_scope(self.scope)
            .with_partition(self.partition);
        if let Some(timeout) = self.queue_timeout_ms {
            policy = policy.with_queue_timeout(millis(timeout));
        }

        policy.validate()?;
        Ok(policy)
    }

    fn reject_fields(&self, name: &str, fields: &[(&str, bool)]) -> Result<()> {
        match fields.iter().find(|(_, present)| *present) {
            Some((field, _)) => Err(ConfigError::invalid(
                name,
                format!("{} does not apply to {:?}", field, self.kind),
            )
            .into()),
            None => Ok(()),
        }
    }
}

fn required<T>(name: &str, field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| ConfigError::MissingRequired(format!("{}.{}", name, field)).into())
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Table entries in document order, repeated names included.
struct SpecEntries(Vec<(String, PolicySpec)>);

impl<'de> Deserialize<'de> for SpecEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = SpecEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping policy names to policies")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<SpecEntries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, PolicySpec>()? {
                    entries.push(entry);
                }
                Ok(SpecEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Immutable set of named policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, Arc<LimiterPolicy>>,
}

impl PolicyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from policies, validating each one.
    pub fn from_policies<I>(policies: I) -> Result<Self>
    where
        I: IntoIterator<Item = LimiterPolicy>,
    {
        let mut table = Self::new();
        for policy in policies {
            table.insert(policy)?;
        }
        Ok(table)
    }

    /// Parse a JSON object mapping policy names to [`PolicySpec`]s.
    ///
    /// A name that appears twice is a [`ConfigError::DuplicatePolicy`].
    pub fn from_json(json: &str) -> Result<Self> {
        let SpecEntries(specs) =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut table = Self::new();
        for (name, spec) in specs {
            table.insert(spec.into_policy(&name)?)?;
        }
        Ok(table)
    }

    /// Add a policy. Fails on invalid parameters or a duplicate name.
    pub fn insert(&mut self, policy: LimiterPolicy) -> Result<()> {
        policy.validate()?;
        if self.policies.contains_key(policy.name()) {
            return Err(ConfigError::DuplicatePolicy(policy.name().to_string()).into());
        }
        self.policies
            .insert(policy.name().to_string(), Arc::new(policy));
        Ok(())
    }

    /// Look up a policy.
    pub fn get(&self, name: &str) -> Option<&Arc<LimiterPolicy>> {
        self.policies.get(name)
    }

    /// Whether a policy exists.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Iterate over all policies.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LimiterPolicy>> {
        self.policies.values()
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
