//! Decision types for admission results.
//!
//! A single acquisition attempt against one policy yields a [`Lease`]. The
//! pipeline folds the leases of every applicable policy into one
//! [`AdmissionResult`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::PartitionKey;

/// Outcome of one acquisition attempt against one policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    /// Whether a permit was granted.
    pub granted: bool,
    /// How long to wait before retrying (only set when rejected).
    pub retry_after: Option<Duration>,
    /// Maximum permits (or tokens) the policy allows.
    pub limit: u64,
    /// Permits left after this attempt.
    pub remaining: u64,
    /// Time until the policy's budget is fully restored.
    pub reset: Duration,
}

impl Lease {
    /// Create a granted lease.
    pub fn granted(limit: u64, remaining: u64, reset: Duration) -> Self {
        Self {
            granted: true,
            retry_after: None,
            limit,
            remaining,
            reset,
        }
    }

    /// Create a rejected lease.
    pub fn rejected(limit: u64, retry_after: Duration, reset: Duration) -> Self {
        Self {
            granted: false,
            retry_after: Some(retry_after),
            limit,
            remaining: 0,
            reset,
        }
    }

    /// Check if the lease is granted.
    pub fn is_granted(&self) -> bool {
        self.granted
    }
}

/// Final decision for one request across every applicable policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionResult {
    /// Whether the request may proceed.
    pub granted: bool,
    /// How long to wait before retrying (only set when rejected).
    pub retry_after: Option<Duration>,
    /// Limit of the deciding policy.
    pub limit: u64,
    /// Remaining permits of the deciding policy.
    pub remaining: u64,
    /// Reset time of the deciding policy.
    pub reset: Duration,
    /// Policy that decided: the rejecting one, or the tightest one on grant.
    pub policy: Option<String>,
    /// Partition the deciding policy charged.
    pub partition: Option<PartitionKey>,
}

impl AdmissionResult {
    /// Build a result from the deciding lease.
    pub fn from_lease(policy: impl Into<String>, partition: PartitionKey, lease: Lease) -> Self {
        Self {
            granted: lease.granted,
            retry_after: lease.retry_after,
            limit: lease.limit,
            remaining: lease.remaining,
            reset: lease.reset,
            policy: Some(policy.into()),
            partition: Some(partition),
        }
    }

    /// Check if the request is admitted.
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Check if the request is rejected.
    pub fn is_rejected(&self) -> bool {
        !self.granted
    }

    /// Retry-after in whole seconds, rounded up, zero when not set.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.map(ceil_secs).unwrap_or(0)
    }
}

/// Whole seconds, rounded up, so a client waiting that long is never early.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Serializable view of a result, for APIs that report their budget in the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSummary {
    /// Whether the request was allowed.
    pub granted: bool,
    /// Maximum requests allowed by the deciding policy.
    pub limit: u64,
    /// Remaining requests.
    pub remaining: u64,
    /// Seconds until the budget resets.
    pub reset_in_seconds: u64,
    /// If rejected, seconds until a retry may succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// Deciding policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl From<&AdmissionResult> for AdmissionSummary {
    fn from(result: &AdmissionResult) -> Self {
        Self {
            granted: result.granted,
            limit: result.limit,
            remaining: result.remaining,
            reset_in_seconds: ceil_secs(result.reset),
            retry_after_seconds: result.retry_after.map(ceil_secs),
            policy: result.policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_granted() {
        let lease = Lease::granted(100, 99, Duration::from_secs(60));

        assert!(lease.is_granted());
        assert_eq!(lease.limit, 100);
        assert_eq!(lease.remaining, 99);
        assert!(lease.retry_after.is_none());
    }

    #[test]
    fn test_lease_rejected() {
        let lease = Lease::rejected(100, Duration::from_secs(30), Duration::from_secs(30));

        assert!(!lease.is_granted());
        assert_eq!(lease.remaining, 0);
        assert_eq!(lease.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_result_from_lease() {
        let lease = Lease::rejected(3, Duration::from_millis(59_500), Duration::from_millis(59_500));
        let result = AdmissionResult::from_lease("LoginLimiter", PartitionKey::anonymous(), lease);

        assert!(result.is_rejected());
        assert_eq!(result.policy.as_deref(), Some("LoginLimiter"));
        assert_eq!(result.retry_after_secs(), 60);
    }

    #[test]
    fn test_seconds_round_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(600)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(40)), 40);
        assert_eq!(ceil_secs(Duration::from_nanos(40_000_000_001)), 41);
    }

    #[test]
    fn test_summary_serialization() {
        let lease = Lease::granted(10, 4, Duration::from_secs(12));
        let result = AdmissionResult::from_lease("Global", PartitionKey::anonymous(), lease);
        let json = serde_json::to_value(AdmissionSummary::from(&result)).unwrap();

        assert_eq!(json["granted"], true);
        assert_eq!(json["remaining"], 4);
        assert_eq!(json["reset_in_seconds"], 12);
        assert!(json.get("retry_after_seconds").is_none());
    }
}
