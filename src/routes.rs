//! Route to policy mapping.
//!
//! The dispatch layer knows which route a request matched; the admission core
//! needs the endpoint policies attached to it. `RouteTable` is that mapping,
//! checked against the policy table once at startup.
//!
//! # Example
//!
//! ```ignore
//! use skp_admission::RouteTable;
//!
//! let routes = RouteTable::builder()
//!     .global_policy("Global")
//!     .route("/api/auth/login", ["LoginLimiter", "IPBasedRateLimiter"])
//!     .route("/api/weather", ["WeatherLimiter"])
//!     .route_pattern("/api/reports/**", ["RedisLimiter"])
//!     .build(&policies)?;
//!
//! let names = routes.policies_for("/api/auth/login");
//! ```

use std::collections::{HashMap, HashSet};

use crate::config::PolicyTable;
use crate::error::{ConfigError, Result};
use crate::key::RequestContext;

/// Endpoint policies per route.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Vec<String>>,
    patterns: Vec<(String, Vec<String>)>,
}

impl RouteTable {
    /// Create a new route table builder.
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    /// Endpoint policies for a path, in evaluation order.
    ///
    /// Exact routes win over patterns; patterns are tried in registration
    /// order. Unmatched paths get no endpoint policies.
    pub fn policies_for(&self, path: &str) -> &[String] {
        if let Some(policies) = self.routes.get(path) {
            return policies;
        }

        self.patterns
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(_, policies)| policies.as_slice())
            .unwrap_or(&[])
    }

    /// Attach the path's endpoint policies to a request context.
    pub fn apply(&self, path: &str, ctx: RequestContext) -> RequestContext {
        ctx.with_policies(self.policies_for(path).iter().cloned())
    }
}

/// Check if a pattern matches a path.
///
/// Simple glob-style matching:
/// - `*` matches any single path segment
/// - `**` matches any number of segments
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut pi = 0;
    let mut pa = 0;

    while pi < pattern_parts.len() && pa < path_parts.len() {
        let p = pattern_parts[pi];

        if p == "**" {
            return true;
        } else if p == "*" || p == path_parts[pa] {
            pi += 1;
            pa += 1;
        } else {
            return false;
        }
    }

    // A trailing `**` also matches nothing.
    if pi + 1 == pattern_parts.len() && pattern_parts[pi] == "**" {
        return true;
    }
    pi == pattern_parts.len() && pa == path_parts.len()
}

/// Builder for [`RouteTable`].
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    global: Option<String>,
    routes: Vec<(String, Vec<String>)>,
    patterns: Vec<(String, Vec<String>)>,
}

impl RouteTableBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the global policy, which routes must not list again.
    pub fn global_policy(mut self, name: impl Into<String>) -> Self {
        self.global = Some(name.into());
        self
    }

    /// Attach policies to an exact path.
    pub fn route<I, S>(mut self, path: impl Into<String>, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes
            .push((path.into(), policies.into_iter().map(Into::into).collect()));
        self
    }

    /// Attach policies to a route pattern.
    ///
    /// Patterns support `*` for single segment and `**` for multiple segments.
    pub fn route_pattern<I, S>(mut self, pattern: impl Into<String>, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns
            .push((pattern.into(), policies.into_iter().map(Into::into).collect()));
        self
    }

    /// Validate every route against `table` and build.
    pub fn build(self, table: &PolicyTable) -> Result<RouteTable> {
        for (route, policies) in self.routes.iter().chain(self.patterns.iter()) {
            self.check(route, policies, table)?;
        }

        let mut routes = HashMap::with_capacity(self.routes.len());
        for (path, policies) in self.routes {
            if routes.insert(path.clone(), policies).is_some() {
                return Err(ConfigError::invalid(&path, "route registered twice").into());
            }
        }

        let mut seen = HashSet::new();
        for (pattern, _) in &self.patterns {
            if !seen.insert(pattern.as_str()) {
                return Err(ConfigError::invalid(pattern, "route pattern registered twice").into());
            }
        }

        Ok(RouteTable {
            routes,
            patterns: self.patterns,
        })
    }

    fn check(&self, route: &str, policies: &[String], table: &PolicyTable) -> Result<()> {
        let mut seen = HashSet::new();
        for policy in policies {
            if !table.contains(policy) {
                return Err(ConfigError::UnknownPolicy {
                    policy: policy.clone(),
                    referrer: route.to_string(),
                }
                .into());
            }
            if self.global.as_deref() == Some(policy.as_str()) {
                return Err(ConfigError::invalid(
                    policy,
                    format!("global policy is applied to every request; remove it from {}", route),
                )
                .into());
            }
            if !seen.insert(policy.as_str()) {
                return Err(ConfigError::invalid(policy, format!("listed twice on {}", route)).into());
            }
        }
        Ok(())
    }
}
