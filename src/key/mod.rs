//! Partition keys for admission control.
//!
//! A partition is the scope a quota is tracked over. Keys are derived from the
//! [`RequestContext`] the dispatch layer hands in, by a [`PartitionKeyResolver`].
//!
//! # Example
//!
//! ```ignore
//! use skp_admission::key::{PartitionKeyResolver, RequestContext};
//!
//! let ctx = RequestContext::new().with_api_key("abc123");
//! let key = PartitionKeyResolver::new().resolve(&ctx);
//! assert_eq!(key.as_str(), "key:abc123");
//! ```

mod resolver;

pub use resolver::{PartitionKeyResolver, PartitionStrategy};

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Sentinel partition for requests that carry no identity at all.
pub const ANONYMOUS: &str = "anonymous";

/// Non-empty identity of a caller within a policy.
///
/// Cheap to clone; the engine keeps one per live partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(Arc<str>);

impl PartitionKey {
    /// The `"anonymous"` sentinel.
    pub fn anonymous() -> Self {
        Self(Arc::from(ANONYMOUS))
    }

    /// Build a key from an arbitrary value, falling back to the sentinel when blank.
    pub fn new(value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        if value.is_empty() {
            Self::anonymous()
        } else {
            Self(Arc::from(value))
        }
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the sentinel.
    pub fn is_anonymous(&self) -> bool {
        &*self.0 == ANONYMOUS
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Request attributes the admission core needs, supplied by the dispatch layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    /// Value of the `X-API-Key` header, if present.
    pub api_key_header: Option<String>,
    /// Subject claim (`sub`) of the authenticated user, if any.
    pub authenticated_subject: Option<String>,
    /// Peer address of the connection.
    pub remote_address: Option<IpAddr>,
    /// Endpoint policies attached to the matched route, in evaluation order.
    pub matched_policy_names: Vec<String>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key header.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key_header = Some(key.into());
        self
    }

    /// Set the authenticated subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.authenticated_subject = Some(subject.into());
        self
    }

    /// Set the remote address.
    pub fn with_remote_address(mut self, addr: IpAddr) -> Self {
        self.remote_address = Some(addr);
        self
    }

    /// Set the endpoint policies.
    pub fn with_policies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matched_policy_names = names.into_iter().map(Into::into).collect();
        self
    }
}
