//! Rendering of rejected requests.
//!
//! The dispatch layer turns a rejected [`AdmissionResult`] into a response
//! with [`RejectionHandler::render`]. Rendering is pure apart from reading
//! the wall clock for the absolute `Retry-After` date, and
//! [`RejectionHandler::render_at`] takes even that as an argument.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::decision::AdmissionResult;
use crate::headers::{RateLimitHeaders, names};

/// Response metadata for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    /// HTTP status code.
    pub status: u16,
    /// Headers, in order.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: String,
}

impl ResponseSpec {
    /// First value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// JSON body of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    /// Short error label.
    pub error: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Renders rejections into responses.
#[derive(Debug, Clone)]
pub struct RejectionHandler {
    status: u16,
    error: String,
    message: String,
}

impl Default for RejectionHandler {
    fn default() -> Self {
        Self {
            status: 429,
            error: "Rate limit exceeded".to_string(),
            message: "You have sent too many requests. Please try again later.".to_string(),
        }
    }
}

impl RejectionHandler {
    /// Create a handler with the default status (429) and body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set the body's error label.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Set the body's message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Render a rejection against the current wall clock.
    pub fn render(&self, result: &AdmissionResult) -> ResponseSpec {
        self.render_at(result, SystemTime::now())
    }

    /// Render a rejection, dating `Retry-After` from `now`.
    pub fn render_at(&self, result: &AdmissionResult, now: SystemTime) -> ResponseSpec {
        let retry_after = result.retry_after_secs();

        let mut headers = RateLimitHeaders::new()
            .limit(result.limit)
            .remaining(0)
            .reset(retry_after)
            .retry_at(now + Duration::from_secs(retry_after))
            .to_vec();
        headers.push((names::CONTENT_TYPE, "application/json".to_string()));

        let body = serde_json::json!({
            "error": self.error,
            "message": self.message,
        })
        .to_string();

        ResponseSpec {
            status: self.status,
            headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Lease;
    use crate::key::PartitionKey;
    use std::time::{Duration, UNIX_EPOCH};

    fn rejected(retry_after: Duration) -> AdmissionResult {
        let lease = Lease::rejected(3, retry_after, retry_after);
        AdmissionResult::from_lease("LoginLimiter", PartitionKey::anonymous(), lease)
    }

    #[test]
    fn test_default_rendering() {
        let now = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let response = RejectionHandler::new().render_at(&rejected(Duration::from_millis(59_600)), now);

        assert_eq!(response.status, 429);
        assert_eq!(response.header("X-Rate-Limit-Limit"), Some("3"));
        assert_eq!(response.header("X-Rate-Limit-Remaining"), Some("0"));
        assert_eq!(response.header("X-Rate-Limit-Reset"), Some("60"));
        assert_eq!(response.header("retry-after"), Some("Sun, 06 Nov 1994 08:50:37 GMT"));
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let body: RejectionBody = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body.error, "Rate limit exceeded");
        assert_eq!(body.message, "You have sent too many requests. Please try again later.");
    }

    #[test]
    fn test_sub_second_wait_is_not_advertised_as_now() {
        let now = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let response = RejectionHandler::new().render_at(&rejected(Duration::from_millis(600)), now);

        assert_eq!(response.header("X-Rate-Limit-Reset"), Some("1"));
        assert_eq!(response.header("Retry-After"), Some("Sun, 06 Nov 1994 08:49:38 GMT"));
    }

    #[test]
    fn test_custom_handler() {
        let handler = RejectionHandler::new()
            .with_status(503)
            .with_error("Busy")
            .with_message("Try later");
        let response = handler.render_at(&rejected(Duration::from_secs(1)), UNIX_EPOCH);

        assert_eq!(response.status, 503);
        let body: RejectionBody = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body, RejectionBody { error: "Busy".into(), message: "Try later".into() });
    }
}
