//! Token Bucket admission algorithm.

use std::time::Duration;

use crate::algorithm::{Algorithm, mul_duration};
use crate::decision::Lease;

/// Token Bucket admission algorithm.
///
/// Allows bursts up to `token_limit` while enforcing an average rate of
/// `tokens_per_period` per `replenishment_period`. Refill is computed lazily
/// on each attempt and credited in whole periods at boundaries counted from
/// the partition's first request.
///
/// A boundary credits at most `tokens_per_period` tokens, and only tokens
/// consumed at least one period before it. Over any interval `T` at most
/// `token_limit + floor(T / period) * tokens_per_period` grants happen, no
/// matter where the interval starts or how long the bucket sat full.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    token_limit: u64,
    tokens_per_period: u64,
    period: Duration,
}

/// Token bucket state.
///
/// `tokens + eligible + recent == token_limit` at all times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketState {
    /// Tokens currently in the bucket.
    pub tokens: u64,
    /// Time of the last credited replenishment boundary.
    pub last_refill: Duration,
    /// Consumed tokens the next boundary may return.
    pub eligible: u64,
    /// Tokens consumed after the last boundary; returnable one boundary later.
    pub recent: u64,
}

impl TokenBucket {
    /// Create a new Token Bucket algorithm instance.
    pub fn new(token_limit: u64, tokens_per_period: u64, period: Duration) -> Self {
        Self {
            token_limit,
            tokens_per_period: tokens_per_period.max(1),
            period: period.max(Duration::from_nanos(1)),
        }
    }

    /// Credit every whole period elapsed since the last refill.
    fn refill(&self, state: &mut TokenBucketState, now: Duration) {
        if now <= state.last_refill {
            return;
        }
        let periods = ((now - state.last_refill).as_nanos() / self.period.as_nanos()) as u64;
        if periods == 0 {
            return;
        }

        let first = state.eligible.min(self.tokens_per_period);
        let mut eligible = state.eligible - first + state.recent;
        let later = eligible.min((periods - 1).saturating_mul(self.tokens_per_period));
        eligible -= later;

        state.tokens += first + later;
        state.eligible = eligible;
        state.recent = 0;
        state.last_refill += mul_duration(self.period, periods);
    }

    /// Boundaries after `last_refill` until a token is back.
    fn boundaries_to_token(&self, state: &TokenBucketState) -> u64 {
        if state.tokens > 0 {
            0
        } else if state.eligible > 0 {
            1
        } else {
            2
        }
    }

    /// Boundaries after `last_refill` until the bucket is full.
    fn boundaries_to_full(&self, state: &TokenBucketState) -> u64 {
        if state.eligible + state.recent == 0 {
            return 0;
        }
        let first = state.eligible.min(self.tokens_per_period);
        let rest = state.eligible - first + state.recent;
        1 + rest.div_ceil(self.tokens_per_period)
    }

    fn after_boundaries(&self, state: &TokenBucketState, boundaries: u64, now: Duration) -> Duration {
        if boundaries == 0 {
            return Duration::ZERO;
        }
        (state.last_refill + mul_duration(self.period, boundaries)).saturating_sub(now)
    }
}

impl Algorithm for TokenBucket {
    type State = TokenBucketState;

    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn new_state(&self, now: Duration) -> TokenBucketState {
        TokenBucketState {
            tokens: self.token_limit,
            last_refill: now,
            eligible: 0,
            recent: 0,
        }
    }

    fn try_acquire(&self, state: &mut TokenBucketState, now: Duration) -> Lease {
        self.refill(state, now);

        if state.tokens >= 1 {
            state.tokens -= 1;
            if now == state.last_refill {
                state.eligible += 1;
            } else {
                state.recent += 1;
            }
            let reset = self.after_boundaries(state, self.boundaries_to_full(state), now);
            Lease::granted(self.token_limit, state.tokens, reset)
        } else {
            Lease::rejected(
                self.token_limit,
                self.after_boundaries(state, self.boundaries_to_token(state), now),
                self.after_boundaries(state, self.boundaries_to_full(state), now),
            )
        }
    }

    fn retry_after(&self, state: &TokenBucketState, now: Duration) -> Duration {
        let mut state = state.clone();
        self.refill(&mut state, now);
        self.after_boundaries(&state, self.boundaries_to_token(&state), now)
    }

    fn horizon(&self) -> Duration {
        // Worst case: emptied just before a boundary, so the first boundary
        // returns nothing.
        mul_duration(self.period, 1 + self.token_limit.div_ceil(self.tokens_per_period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_token_bucket_basic() {
        let algorithm = TokenBucket::new(5, 5, secs(60));
        let mut state = algorithm.new_state(Duration::ZERO);

        for i in 1..=5 {
            let lease = algorithm.try_acquire(&mut state, Duration::ZERO);
            assert!(lease.granted, "Request {} should be granted", i);
        }

        let lease = algorithm.try_acquire(&mut state, Duration::ZERO);
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(secs(60)));
    }

    #[test]
    fn test_token_bucket_refill_in_whole_periods() {
        let algorithm = TokenBucket::new(1, 10, secs(60));
        let mut state = algorithm.new_state(Duration::ZERO);

        assert!(algorithm.try_acquire(&mut state, Duration::ZERO).granted);

        let lease = algorithm.try_acquire(&mut state, secs(1));
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(secs(59)));

        assert!(algorithm.try_acquire(&mut state, secs(61)).granted);
    }

    #[test]
    fn test_refill_capped_at_limit() {
        let algorithm = TokenBucket::new(3, 2, secs(10));
        let mut state = algorithm.new_state(Duration::ZERO);
        for _ in 0..3 {
            algorithm.try_acquire(&mut state, Duration::ZERO);
        }

        algorithm.try_acquire(&mut state, secs(1000));
        assert_eq!(state.tokens, 2);
        assert_eq!(state.last_refill, secs(1000));
    }

    #[test]
    fn test_partial_period_is_kept() {
        let algorithm = TokenBucket::new(2, 1, secs(10));
        let mut state = algorithm.new_state(Duration::ZERO);
        algorithm.try_acquire(&mut state, Duration::ZERO);
        algorithm.try_acquire(&mut state, Duration::ZERO);

        // 15s elapsed: one period is credited, the remaining 5s count toward the next.
        assert!(algorithm.try_acquire(&mut state, secs(15)).granted);
        assert_eq!(state.last_refill, secs(10));
        assert!(!algorithm.try_acquire(&mut state, secs(19)).granted);
        assert!(algorithm.try_acquire(&mut state, secs(20)).granted);
    }

    #[test]
    fn test_reset_is_time_to_full() {
        let algorithm = TokenBucket::new(4, 1, secs(10));
        let mut state = algorithm.new_state(Duration::ZERO);
        algorithm.try_acquire(&mut state, Duration::ZERO);
        let lease = algorithm.try_acquire(&mut state, secs(2));
        assert_eq!(lease.reset, secs(18));
        assert_eq!(algorithm.horizon(), secs(50));
    }

    #[test]
    fn test_time_spent_full_does_not_bank_a_refill() {
        let algorithm = TokenBucket::new(1, 10, secs(60));
        let mut state = algorithm.new_state(Duration::ZERO);

        assert!(algorithm.try_acquire(&mut state, Duration::ZERO).granted);
        assert!(algorithm.try_acquire(&mut state, secs(119)).granted);

        let lease = algorithm.try_acquire(&mut state, secs(120));
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(secs(60)));
        assert!(algorithm.try_acquire(&mut state, secs(180)).granted);
    }

    #[test]
    fn test_token_consumed_before_boundary_waits_a_full_period() {
        let algorithm = TokenBucket::new(2, 2, secs(10));
        let mut state = algorithm.new_state(Duration::ZERO);

        assert!(algorithm.try_acquire(&mut state, Duration::ZERO).granted);
        assert!(algorithm.try_acquire(&mut state, Duration::from_millis(9_900)).granted);

        // Only the token taken at 0s is back at 10s.
        assert!(algorithm.try_acquire(&mut state, secs(10)).granted);
        let lease = algorithm.try_acquire(&mut state, secs(10));
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(secs(10)));

        assert!(algorithm.try_acquire(&mut state, secs(20)).granted);
        assert!(algorithm.try_acquire(&mut state, secs(20)).granted);
    }

    #[test]
    fn test_empty_bucket_with_only_recent_tokens_waits_two_boundaries() {
        let algorithm = TokenBucket::new(1, 1, secs(10));
        let mut state = algorithm.new_state(Duration::ZERO);

        assert!(algorithm.try_acquire(&mut state, secs(15)).granted);
        assert_eq!(state.last_refill, secs(10));
        assert_eq!(state.recent, 1);

        let lease = algorithm.try_acquire(&mut state, secs(21));
        assert!(!lease.granted);
        assert_eq!(lease.retry_after, Some(secs(9)));
        assert!(algorithm.try_acquire(&mut state, secs(30)).granted);
    }
}
