//! Admission pipeline.
//!
//! Composes the global policy with a route's endpoint policies into one
//! decision per request. The global policy always runs first; endpoint
//! policies follow in the order the route lists them. The first rejection
//! ends evaluation, so later policies are not charged for a request that
//! will not proceed.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use skp_admission::{AdmissionPipeline, LocalLimiterEngine, PolicyTable, RequestContext};
//!
//! let table = Arc::new(PolicyTable::from_json(include_str!("policies.json"))?);
//! let pipeline = AdmissionPipeline::builder()
//!     .engine(Arc::new(LocalLimiterEngine::new(table)))
//!     .global_policy("Global")
//!     .build()?;
//!
//! let ctx = RequestContext::new()
//!     .with_subject("alice")
//!     .with_policies(["WeatherLimiter"]);
//! let result = pipeline.evaluate(&ctx).await?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::decision::{AdmissionResult, Lease};
use crate::distributed::DistributedCounterClient;
use crate::engine::LocalLimiterEngine;
use crate::error::{AdmissionError, ConfigError, Result};
use crate::key::{PartitionKey, PartitionKeyResolver, RequestContext};
use crate::policy::{LimiterPolicy, PolicyScope};
use crate::storage::{CounterStore, MemoryCounterStore};

/// Evaluates every applicable policy for a request.
#[derive(Debug)]
pub struct AdmissionPipeline<S = MemoryCounterStore> {
    engine: Arc<LocalLimiterEngine>,
    distributed: Option<Arc<DistributedCounterClient<S>>>,
    resolver: PartitionKeyResolver,
    global_policy: String,
}

impl AdmissionPipeline<MemoryCounterStore> {
    /// Create a new pipeline builder.
    pub fn builder() -> AdmissionPipelineBuilder<MemoryCounterStore> {
        AdmissionPipelineBuilder::new()
    }
}

impl<S: CounterStore> AdmissionPipeline<S> {
    /// Decide whether a request may proceed.
    ///
    /// Errors only on broken configuration or store failures the distributed
    /// client's failure policy does not cover; a rejection is an `Ok` result
    /// with `granted == false`.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Result<AdmissionResult> {
        let endpoint = ctx
            .matched_policy_names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != self.global_policy);

        let mut tightest: Option<AdmissionResult> = None;
        for name in std::iter::once(self.global_policy.as_str()).chain(endpoint) {
            let policy = self
                .engine
                .policy(name)
                .ok_or_else(|| AdmissionError::UnknownPolicy(name.to_string()))?;
            let partition = self.resolver.resolve_for(policy.partition(), ctx);
            let lease = self.acquire(policy, &partition).await?;

            if !lease.granted {
                info!(
                    policy = name,
                    partition = %partition,
                    retry_after_ms = lease.retry_after.map(|d| d.as_millis() as u64).unwrap_or(0),
                    "request rejected"
                );
                return Ok(AdmissionResult::from_lease(name, partition, lease));
            }

            if tightest.as_ref().is_none_or(|t| lease.remaining < t.remaining) {
                tightest = Some(AdmissionResult::from_lease(name, partition, lease));
            }
        }

        tightest.ok_or_else(|| AdmissionError::Internal("no policy was evaluated".into()))
    }

    async fn acquire(&self, policy: &LimiterPolicy, partition: &PartitionKey) -> Result<Lease> {
        match policy.scope() {
            PolicyScope::Local => self.engine.acquire(policy.name(), partition).await,
            PolicyScope::Distributed => match &self.distributed {
                Some(client) => client.acquire(policy.name(), partition).await,
                None => Err(AdmissionError::Internal(format!(
                    "distributed policy {} has no counter client",
                    policy.name()
                ))),
            },
        }
    }

    /// The local engine.
    pub fn engine(&self) -> &Arc<LocalLimiterEngine> {
        &self.engine
    }

    /// Name of the policy applied to every request.
    pub fn global_policy(&self) -> &str {
        &self.global_policy
    }
}

/// Builder for [`AdmissionPipeline`].
#[derive(Debug)]
pub struct AdmissionPipelineBuilder<S = MemoryCounterStore> {
    engine: Option<Arc<LocalLimiterEngine>>,
    distributed: Option<Arc<DistributedCounterClient<S>>>,
    resolver: PartitionKeyResolver,
    global_policy: Option<String>,
}

impl Default for AdmissionPipelineBuilder<MemoryCounterStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionPipelineBuilder<MemoryCounterStore> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            engine: None,
            distributed: None,
            resolver: PartitionKeyResolver::new(),
            global_policy: None,
        }
    }
}

impl<S: CounterStore> AdmissionPipelineBuilder<S> {
    /// Set the local engine. Its policy table is the pipeline's policy table.
    pub fn engine(mut self, engine: Arc<LocalLimiterEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the policy applied to every request.
    pub fn global_policy(mut self, name: impl Into<String>) -> Self {
        self.global_policy = Some(name.into());
        self
    }

    /// Set the partition key resolver.
    pub fn resolver(mut self, resolver: PartitionKeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the client for distributed policies.
    pub fn distributed<T: CounterStore>(
        self,
        client: Arc<DistributedCounterClient<T>>,
    ) -> AdmissionPipelineBuilder<T> {
        AdmissionPipelineBuilder {
            engine: self.engine,
            distributed: Some(client),
            resolver: self.resolver,
            global_policy: self.global_policy,
        }
    }

    /// Build the pipeline.
    ///
    /// Fails if the engine or global policy is missing, the global policy is
    /// not in the table, or a distributed policy has no client.
    pub fn build(self) -> Result<AdmissionPipeline<S>> {
        let engine = self
            .engine
            .ok_or_else(|| ConfigError::MissingRequired("engine".into()))?;
        let global_policy = self
            .global_policy
            .ok_or_else(|| ConfigError::MissingRequired("global policy".into()))?;

        if engine.policy(&global_policy).is_none() {
            return Err(ConfigError::UnknownPolicy {
                policy: global_policy,
                referrer: "admission pipeline".into(),
            }
            .into());
        }

        if self.distributed.is_none() {
            if let Some(policy) = engine
                .table()
                .iter()
                .find(|p| p.scope() == PolicyScope::Distributed)
            {
                return Err(ConfigError::MissingRequired(format!(
                    "counter client for distributed policy {}",
                    policy.name()
                ))
                .into());
            }
        }

        Ok(AdmissionPipeline {
            engine,
            distributed: self.distributed,
            resolver: self.resolver,
            global_policy,
        })
    }
}
