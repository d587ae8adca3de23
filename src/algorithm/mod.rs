//! Admission algorithms.
//!
//! Each algorithm is pure decision logic: it owns no state of its own and
//! reads time only through the `now` it is handed. The engine keeps the state
//! and provides mutual exclusion.
//!
//! # Available Algorithms
//!
//! | Algorithm | Boundary burst | State | Queueing |
//! |-----------|----------------|-------|----------|
//! | Fixed Window | up to 2x limit | count + window start | yes |
//! | Sliding Window | reduced | `segments + 1` counters | yes |
//! | Token Bucket | bounded by capacity | tokens + last refill | yes |

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::{FixedWindow, FixedWindowState};
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};

use std::time::Duration;

use crate::decision::Lease;
use crate::error::{AdmissionError, Result};
use crate::policy::{LimiterPolicy, PolicyKind};

/// Admission algorithm trait.
///
/// Implementations must check before they consume: a rejected attempt leaves
/// the state's budget untouched.
pub trait Algorithm {
    /// Per-partition state.
    type State;

    /// Get the algorithm name (for logging).
    fn name(&self) -> &'static str;

    /// Fresh state for a partition first seen at `now`.
    fn new_state(&self, now: Duration) -> Self::State;

    /// Try to take one permit.
    fn try_acquire(&self, state: &mut Self::State, now: Duration) -> Lease;

    /// Time from `now` until a permit could next be granted. Zero if one is available.
    fn retry_after(&self, state: &Self::State, now: Duration) -> Duration;

    /// Idle time after which a state is equivalent to a fresh one.
    fn horizon(&self) -> Duration;
}

/// Algorithm for one policy, chosen by its kind.
#[derive(Debug, Clone, Copy)]
pub enum Limiter {
    /// Fixed window.
    FixedWindow(FixedWindow),
    /// Sliding window.
    SlidingWindow(SlidingWindow),
    /// Token bucket.
    TokenBucket(TokenBucket),
}

/// State for one partition of one policy.
#[derive(Debug, Clone)]
pub enum LimiterState {
    /// Fixed window state.
    FixedWindow(FixedWindowState),
    /// Sliding window state.
    SlidingWindow(SlidingWindowState),
    /// Token bucket state.
    TokenBucket(TokenBucketState),
}

impl Limiter {
    /// Build the algorithm for a policy.
    pub fn for_policy(policy: &LimiterPolicy) -> Self {
        match *policy.kind() {
            PolicyKind::FixedWindow { permit_limit, window } => {
                Self::FixedWindow(FixedWindow::new(permit_limit, window))
            }
            PolicyKind::SlidingWindow {
                permit_limit,
                window,
                segments,
            } => Self::SlidingWindow(SlidingWindow::new(permit_limit, window, segments)),
            PolicyKind::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            } => Self::TokenBucket(TokenBucket::new(
                token_limit,
                tokens_per_period,
                replenishment_period,
            )),
        }
    }

    /// Algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedWindow(a) => a.name(),
            Self::SlidingWindow(a) => a.name(),
            Self::TokenBucket(a) => a.name(),
        }
    }

    /// Fresh state.
    pub fn new_state(&self, now: Duration) -> LimiterState {
        match self {
            Self::FixedWindow(a) => LimiterState::FixedWindow(a.new_state(now)),
            Self::SlidingWindow(a) => LimiterState::SlidingWindow(a.new_state(now)),
            Self::TokenBucket(a) => LimiterState::TokenBucket(a.new_state(now)),
        }
    }

    /// Try to take one permit.
    ///
    /// Fails if `state` belongs to a different algorithm, which means the
    /// engine's bookkeeping is corrupt.
    pub fn try_acquire(&self, state: &mut LimiterState, now: Duration) -> Result<Lease> {
        match (self, state) {
            (Self::FixedWindow(a), LimiterState::FixedWindow(s)) => Ok(a.try_acquire(s, now)),
            (Self::SlidingWindow(a), LimiterState::SlidingWindow(s)) => Ok(a.try_acquire(s, now)),
            (Self::TokenBucket(a), LimiterState::TokenBucket(s)) => Ok(a.try_acquire(s, now)),
            (limiter, state) => Err(mismatch(limiter, state)),
        }
    }

    /// Time until a permit could next be granted.
    pub fn retry_after(&self, state: &LimiterState, now: Duration) -> Result<Duration> {
        match (self, state) {
            (Self::FixedWindow(a), LimiterState::FixedWindow(s)) => Ok(a.retry_after(s, now)),
            (Self::SlidingWindow(a), LimiterState::SlidingWindow(s)) => Ok(a.retry_after(s, now)),
            (Self::TokenBucket(a), LimiterState::TokenBucket(s)) => Ok(a.retry_after(s, now)),
            (limiter, state) => Err(mismatch(limiter, state)),
        }
    }

    /// Idle horizon.
    pub fn horizon(&self) -> Duration {
        match self {
            Self::FixedWindow(a) => a.horizon(),
            Self::SlidingWindow(a) => a.horizon(),
            Self::TokenBucket(a) => a.horizon(),
        }
    }
}

impl LimiterState {
    fn name(&self) -> &'static str {
        match self {
            Self::FixedWindow(_) => "fixed_window",
            Self::SlidingWindow(_) => "sliding_window",
            Self::TokenBucket(_) => "token_bucket",
        }
    }
}

fn mismatch(limiter: &Limiter, state: &LimiterState) -> AdmissionError {
    AdmissionError::Internal(format!(
        "{} limiter handed {} state",
        limiter.name(),
        state.name()
    ))
}

/// `duration * n`, saturating instead of overflowing.
pub(crate) fn mul_duration(duration: Duration, n: u64) -> Duration {
    let nanos = duration.as_nanos().saturating_mul(n as u128);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
