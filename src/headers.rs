//! HTTP headers for admission results.
//!
//! Header names shared by rejection responses and pass-through responses
//! that advertise the caller's remaining budget.

use std::time::SystemTime;

use crate::decision::{AdmissionResult, ceil_secs};

/// Rate limit header names.
pub mod names {
    /// Maximum requests allowed by the deciding policy.
    pub const RATE_LIMIT_LIMIT: &str = "X-Rate-Limit-Limit";

    /// Remaining requests.
    pub const RATE_LIMIT_REMAINING: &str = "X-Rate-Limit-Remaining";

    /// Seconds until the budget resets (or, on rejection, until a retry may succeed).
    pub const RATE_LIMIT_RESET: &str = "X-Rate-Limit-Reset";

    /// When the client should retry (standard HTTP header).
    pub const RETRY_AFTER: &str = "Retry-After";

    /// The deciding policy name (extended).
    pub const RATE_LIMIT_POLICY: &str = "X-Rate-Limit-Policy";

    /// Response body media type.
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Builder for rate limit headers.
#[derive(Debug, Default)]
pub struct RateLimitHeaders {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<u64>,
    retry_after: Option<String>,
    policy: Option<String>,
}

impl RateLimitHeaders {
    /// Create a new header builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit header.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining header.
    pub fn remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset header (seconds).
    pub fn reset(mut self, reset_seconds: u64) -> Self {
        self.reset = Some(reset_seconds);
        self
    }

    /// Set `Retry-After` as delta-seconds.
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds.to_string());
        self
    }

    /// Set `Retry-After` as an absolute HTTP-date.
    pub fn retry_at(mut self, at: SystemTime) -> Self {
        self.retry_after = Some(httpdate::fmt_http_date(at));
        self
    }

    /// Set the policy header.
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Convert to a vector of (name, value) pairs.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(limit) = self.limit {
            headers.push((names::RATE_LIMIT_LIMIT, limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push((names::RATE_LIMIT_REMAINING, remaining.to_string()));
        }
        if let Some(reset) = self.reset {
            headers.push((names::RATE_LIMIT_RESET, reset.to_string()));
        }
        if let Some(ref retry_after) = self.retry_after {
            headers.push((names::RETRY_AFTER, retry_after.clone()));
        }
        if let Some(ref policy) = self.policy {
            headers.push((names::RATE_LIMIT_POLICY, policy.clone()));
        }

        headers
    }
}

/// Budget headers for a granted request.
impl From<&AdmissionResult> for RateLimitHeaders {
    fn from(result: &AdmissionResult) -> Self {
        let mut headers = Self::new()
            .limit(result.limit)
            .remaining(result.remaining)
            .reset(ceil_secs(result.reset));

        if let Some(retry) = result.retry_after {
            headers = headers.retry_after(ceil_secs(retry));
        }

        if let Some(ref policy) = result.policy {
            headers = headers.policy(policy.clone());
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Lease;
    use crate::key::PartitionKey;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_header_builder() {
        let headers = RateLimitHeaders::new()
            .limit(100)
            .remaining(50)
            .reset(30)
            .policy("WeatherLimiter")
            .to_vec();

        assert_eq!(headers.len(), 4);
        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Limit" && v == "100"));
        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Remaining" && v == "50"));
        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Reset" && v == "30"));
        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Policy" && v == "WeatherLimiter"));
    }

    #[test]
    fn test_retry_at_is_http_date() {
        let at = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let headers = RateLimitHeaders::new().retry_at(at).to_vec();

        assert_eq!(
            headers,
            vec![("Retry-After", "Sun, 06 Nov 1994 08:49:37 GMT".to_string())]
        );
    }

    #[test]
    fn test_from_granted_result() {
        let lease = Lease::granted(5, 3, Duration::from_millis(12_500));
        let result = AdmissionResult::from_lease("WeatherLimiter", PartitionKey::anonymous(), lease);
        let headers = RateLimitHeaders::from(&result).to_vec();

        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Remaining" && v == "3"));
        assert!(headers.iter().any(|(k, v)| *k == "X-Rate-Limit-Reset" && v == "13"));
        assert!(!headers.iter().any(|(k, _)| *k == "Retry-After"));
    }
}
