//! Local limiter engine.
//!
//! Owns the state of every `(policy, partition)` pair and serializes access to
//! each one, so counts stay exact under any concurrency while unrelated
//! partitions proceed in parallel.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use skp_admission::{LimiterPolicy, LocalLimiterEngine, PartitionKey, PolicyTable};
//!
//! let table = PolicyTable::from_policies([
//!     LimiterPolicy::fixed_window("LoginLimiter", 3, Duration::from_secs(60)),
//! ])?;
//! let engine = LocalLimiterEngine::new(Arc::new(table));
//!
//! let lease = engine.acquire("LoginLimiter", &PartitionKey::new("ip:10.0.0.7")).await?;
//! assert!(lease.granted);
//! ```

mod queue;
mod sweep;

pub use sweep::{EngineConfig, SweepInterval};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tracing::debug;

use crate::algorithm::{Limiter, LimiterState};
use crate::clock::{Clock, SystemClock};
use crate::config::PolicyTable;
use crate::decision::Lease;
use crate::error::{AdmissionError, Result};
use crate::key::PartitionKey;
use crate::policy::LimiterPolicy;

use queue::{Enqueued, WaitQueue};

/// Shortest sleep between checks of a queued request.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Identity of one partition's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StateKey {
    policy: Arc<str>,
    partition: PartitionKey,
}

/// Mutable state of one partition of one policy.
#[derive(Debug)]
pub(crate) struct PartitionState {
    limiter: LimiterState,
    pub(crate) queue: WaitQueue,
    pub(crate) last_seen: Duration,
    pub(crate) idle_ttl: Duration,
}

pub(crate) type SharedState = Arc<Mutex<PartitionState>>;
pub(crate) type StateMap = DashMap<StateKey, SharedState>;

impl PartitionState {
    /// Release queued waiters while capacity lasts.
    ///
    /// Returns the rejection that stopped the drain, or `None` when the queue
    /// is empty.
    fn drain(&mut self, limiter: &Limiter, now: Duration) -> Result<Option<Lease>> {
        loop {
            self.queue.prune();
            if self.queue.is_empty() {
                return Ok(None);
            }
            let lease = limiter.try_acquire(&mut self.limiter, now)?;
            if !lease.granted {
                return Ok(Some(lease));
            }
            if let Some(waiter) = self.queue.pop_next() {
                if !waiter.wake(lease) {
                    debug!("queued request left before its permit was delivered");
                }
            }
        }
    }
}

/// A policy prepared for enforcement.
#[derive(Debug)]
struct PolicyEntry {
    policy: Arc<LimiterPolicy>,
    name: Arc<str>,
    limiter: Limiter,
    idle_ttl: Duration,
}

impl PolicyEntry {
    fn rejection(&self, retry_after: Duration) -> Lease {
        Lease::rejected(self.policy.kind().limit(), retry_after, retry_after)
    }
}

/// Outcome of the locked part of an acquisition.
enum Admission {
    Done(Lease),
    Queued {
        id: u64,
        rx: oneshot::Receiver<Lease>,
        hint: Duration,
    },
}

/// Outcome of a queued request's periodic check.
enum Wait {
    Done(Lease),
    Pending(Duration),
}

/// Removes a queued request from its queue when the request goes away.
struct QueueTicket {
    state: SharedState,
    id: u64,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.state.lock().queue.remove(self.id);
    }
}

/// In-process limiter engine.
///
/// State is created on first use and evicted by the sweep once it has been
/// idle past its TTL. Cloning is not supported; share the engine through an
/// `Arc`.
pub struct LocalLimiterEngine {
    table: Arc<PolicyTable>,
    policies: HashMap<String, PolicyEntry>,
    states: Arc<StateMap>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    shutdown: Arc<Notify>,
}

impl fmt::Debug for LocalLimiterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLimiterEngine")
            .field("policies", &self.policies.len())
            .field("partitions", &self.states.len())
            .field("config", &self.config)
            .finish()
    }
}

impl LocalLimiterEngine {
    /// Create an engine on the system clock with the default configuration.
    pub fn new(table: Arc<PolicyTable>) -> Self {
        Self::with_config(table, SystemClock::new(), EngineConfig::default())
    }

    /// Create an engine on the given clock with the default configuration.
    pub fn with_clock(table: Arc<PolicyTable>, clock: impl Clock) -> Self {
        Self::with_config(table, clock, EngineConfig::default())
    }

    /// Create an engine with full control over clock and configuration.
    ///
    /// A background sweep is started when the configuration asks for one and
    /// a tokio runtime is available.
    pub fn with_config(table: Arc<PolicyTable>, clock: impl Clock, config: EngineConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let policies = table
            .iter()
            .map(|policy| {
                let limiter = Limiter::for_policy(policy);
                let entry = PolicyEntry {
                    policy: Arc::clone(policy),
                    name: Arc::from(policy.name()),
                    limiter,
                    idle_ttl: config.idle_ttl.max(limiter.horizon()),
                };
                (policy.name().to_string(), entry)
            })
            .collect();

        let engine = Self {
            table,
            policies,
            states: Arc::new(DashMap::new()),
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
        };

        if let SweepInterval::Duration(interval) = engine.config.sweep {
            sweep::spawn_sweeper(
                Arc::downgrade(&engine.states),
                Arc::clone(&engine.clock),
                interval,
                Arc::clone(&engine.shutdown),
            );
        }

        engine
    }

    /// Try to take one permit from `policy` for `partition`.
    ///
    /// When the policy is exhausted and allows queueing, waits until a permit
    /// frees up or the queue timeout elapses; otherwise rejects immediately.
    ///
    /// The queue timeout is measured on the engine's clock. Between checks a
    /// waiter sleeps on the tokio timer, so with a [`ManualClock`] it notices
    /// an advance at its next check or when another request for the same
    /// partition releases it.
    ///
    /// [`ManualClock`]: crate::clock::ManualClock
    pub async fn acquire(&self, policy: &str, partition: &PartitionKey) -> Result<Lease> {
        let entry = self
            .policies
            .get(policy)
            .ok_or_else(|| AdmissionError::UnknownPolicy(policy.to_string()))?;
        let shared = self.state_for(entry, partition);

        match self.admit(entry, &shared)? {
            Admission::Done(lease) => Ok(lease),
            Admission::Queued { id, rx, hint } => self.wait(entry, shared, id, rx, hint).await,
        }
    }

    fn state_for(&self, entry: &PolicyEntry, partition: &PartitionKey) -> SharedState {
        let key = StateKey {
            policy: Arc::clone(&entry.name),
            partition: partition.clone(),
        };
        if let Some(existing) = self.states.get(&key) {
            return Arc::clone(existing.value());
        }

        let now = self.clock.now();
        let shared = self.states.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(PartitionState {
                limiter: entry.limiter.new_state(now),
                queue: WaitQueue::new(entry.policy.queue()),
                last_seen: now,
                idle_ttl: entry.idle_ttl,
            }))
        });
        Arc::clone(shared.value())
    }

    fn admit(&self, entry: &PolicyEntry, shared: &SharedState) -> Result<Admission> {
        let mut state = shared.lock();
        let now = self.clock.now();
        state.last_seen = now;

        // Waiters go first; a newcomer never overtakes them.
        let rejection = match state.drain(&entry.limiter, now)? {
            Some(blocked) => blocked,
            None => {
                let lease = entry.limiter.try_acquire(&mut state.limiter, now)?;
                if lease.granted {
                    return Ok(Admission::Done(lease));
                }
                lease
            }
        };

        match state.queue.push() {
            Enqueued::Full => Ok(Admission::Done(rejection)),
            Enqueued::Joined { id, rx, evicted } => {
                if let Some(oldest) = evicted {
                    debug!(policy = %entry.name, "queue full, evicting oldest waiter");
                    oldest.wake(rejection.clone());
                }
                debug!(policy = %entry.name, depth = state.queue.len(), "request queued");
                let hint = rejection.retry_after.unwrap_or(MIN_POLL);
                Ok(Admission::Queued { id, rx, hint })
            }
        }
    }

    async fn wait(
        &self,
        entry: &PolicyEntry,
        shared: SharedState,
        id: u64,
        mut rx: oneshot::Receiver<Lease>,
        mut hint: Duration,
    ) -> Result<Lease> {
        let _ticket = QueueTicket {
            state: Arc::clone(&shared),
            id,
        };
        let deadline = self.clock.now() + entry.policy.queue_timeout();

        loop {
            let remaining = deadline.saturating_sub(self.clock.now());
            let pause = hint.min(remaining).max(MIN_POLL);
            tokio::select! {
                lease = &mut rx => {
                    return lease.map_err(|_| {
                        AdmissionError::Internal("queued request dropped without a decision".into())
                    });
                }
                _ = tokio::time::sleep(pause) => {}
            }

            let expired = self.clock.now() >= deadline;
            match self.recheck(entry, &shared, id, &mut rx, expired)? {
                Wait::Done(lease) => return Ok(lease),
                Wait::Pending(next) => hint = next,
            }
        }
    }

    fn recheck(
        &self,
        entry: &PolicyEntry,
        shared: &SharedState,
        id: u64,
        rx: &mut oneshot::Receiver<Lease>,
        expired: bool,
    ) -> Result<Wait> {
        let mut state = shared.lock();
        let now = self.clock.now();
        state.last_seen = now;

        let blocked = state.drain(&entry.limiter, now)?;
        if let Ok(lease) = rx.try_recv() {
            return Ok(Wait::Done(lease));
        }

        let retry_after = match blocked.and_then(|lease| lease.retry_after) {
            Some(retry_after) => retry_after,
            None => entry.limiter.retry_after(&state.limiter, now)?,
        };

        if expired {
            state.queue.remove(id);
            debug!(policy = %entry.name, "queued request timed out");
            return Ok(Wait::Done(entry.rejection(retry_after)));
        }
        Ok(Wait::Pending(retry_after))
    }

    /// Evict partitions idle past their TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let evicted = sweep::sweep_states(&self.states, self.clock.now());
        debug!(evicted, remaining = self.states.len(), "manual sweep");
        evicted
    }

    /// Requests currently queued on a partition.
    pub fn queued(&self, policy: &str, partition: &PartitionKey) -> usize {
        let key = StateKey {
            policy: Arc::from(policy),
            partition: partition.clone(),
        };
        self.states
            .get(&key)
            .map(|shared| shared.lock().queue.len())
            .unwrap_or(0)
    }

    /// Look up a policy.
    pub fn policy(&self, name: &str) -> Option<&Arc<LimiterPolicy>> {
        self.policies.get(name).map(|entry| &entry.policy)
    }

    /// The policy table the engine enforces.
    pub fn table(&self) -> &Arc<PolicyTable> {
        &self.table
    }

    /// Number of live partitions.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no partition has live state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Drop for LocalLimiterEngine {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}
