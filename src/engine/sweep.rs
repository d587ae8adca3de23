//! Idle state eviction.
//!
//! Partition state is created lazily and would otherwise grow without bound
//! as new callers show up. The sweep removes state that has been idle longer
//! than its TTL, either on a background task or when called by hand.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::clock::Clock;
use crate::engine::StateMap;

/// When the engine sweeps idle partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepInterval {
    /// Sweep on a background task at a fixed interval.
    Duration(Duration),
    /// Only sweep when [`LocalLimiterEngine::sweep`](crate::engine::LocalLimiterEngine::sweep) is called.
    Manual,
}

impl Default for SweepInterval {
    fn default() -> Self {
        Self::Duration(Duration::from_secs(60))
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When to sweep.
    pub sweep: SweepInterval,
    /// Minimum idle time before a partition is evicted (default: 1 hour).
    ///
    /// Raised per policy to the policy's horizon, so eviction never forgets
    /// budget that is still being enforced.
    pub idle_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep: SweepInterval::default(),
            idle_ttl: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Create config with a background sweep.
    pub fn on_interval(interval: Duration) -> Self {
        Self {
            sweep: SweepInterval::Duration(interval),
            ..Default::default()
        }
    }

    /// Create config with manual sweeps only.
    pub fn manual() -> Self {
        Self {
            sweep: SweepInterval::Manual,
            ..Default::default()
        }
    }

    /// Set the idle TTL.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }
}

/// Evict idle partitions. Returns how many were removed.
///
/// A state is only removed while nothing else holds a handle to it: the map
/// shard is write-locked during `retain`, so no acquirer can pick it up
/// concurrently, and queued waiters keep their own handle.
pub(crate) fn sweep_states(states: &StateMap, now: Duration) -> usize {
    let before = states.len();
    states.retain(|_, shared| {
        if Arc::strong_count(shared) > 1 {
            return true;
        }
        let state = shared.lock();
        !state.queue.is_empty() || now.saturating_sub(state.last_seen) < state.idle_ttl
    });
    before.saturating_sub(states.len())
}

/// Start the background sweep. The task exits once the engine is dropped.
pub(crate) fn spawn_sweeper(
    states: Weak<StateMap>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            tracing::warn!("no tokio runtime; idle partitions are only evicted by manual sweeps");
            return;
        }
    };

    handle.spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let Some(states) = states.upgrade() else { break };
                    let evicted = sweep_states(&states, clock.now());
                    if evicted > 0 {
                        debug!(evicted, remaining = states.len(), "swept idle partitions");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config() {
        let config = EngineConfig::on_interval(Duration::from_secs(5))
            .with_idle_ttl(Duration::from_secs(600));

        assert_eq!(config.sweep, SweepInterval::Duration(Duration::from_secs(5)));
        assert_eq!(config.idle_ttl, Duration::from_secs(600));
        assert_eq!(EngineConfig::manual().sweep, SweepInterval::Manual);
    }
}
