//! Partition key resolution.

use serde::{Deserialize, Serialize};

use crate::key::{PartitionKey, RequestContext};

/// How a policy groups callers into partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// API key, then subject claim, then remote address, then the sentinel.
    #[default]
    Caller,
    /// Remote address only, then the sentinel.
    RemoteAddress,
    /// One partition shared by every caller.
    Shared,
}

/// Derives partition keys from request attributes.
///
/// Resolution never fails; a request with no usable identity lands in the
/// `"anonymous"` partition. Keys are prefixed with their source (`key:`,
/// `sub:`, `ip:`) so an API key that happens to equal an IP string does not
/// share that address's counters.
#[derive(Debug, Clone, Default)]
pub struct PartitionKeyResolver;

impl PartitionKeyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve using the caller precedence chain.
    pub fn resolve(&self, ctx: &RequestContext) -> PartitionKey {
        self.resolve_for(PartitionStrategy::Caller, ctx)
    }

    /// Resolve with an explicit strategy.
    pub fn resolve_for(&self, strategy: PartitionStrategy, ctx: &RequestContext) -> PartitionKey {
        match strategy {
            PartitionStrategy::Caller => non_blank(ctx.api_key_header.as_deref())
                .map(|key| PartitionKey::new(format!("key:{}", key)))
                .or_else(|| {
                    non_blank(ctx.authenticated_subject.as_deref())
                        .map(|sub| PartitionKey::new(format!("sub:{}", sub)))
                })
                .or_else(|| remote(ctx))
                .unwrap_or_else(PartitionKey::anonymous),
            PartitionStrategy::RemoteAddress => remote(ctx).unwrap_or_else(PartitionKey::anonymous),
            PartitionStrategy::Shared => PartitionKey::new("shared"),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn remote(ctx: &RequestContext) -> Option<PartitionKey> {
    ctx.remote_address
        .map(|ip| PartitionKey::new(format!("ip:{}", ip)))
}
