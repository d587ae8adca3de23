//! Sliding Window admission algorithm.

use std::collections::VecDeque;
use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::Lease;

/// Sliding Window admission algorithm.
///
/// Splits the window into `segments` equal segments aligned to the clock's
/// origin. The trailing window always covers the whole of the newest
/// `segments - 1` segments, the elapsed part of the current one, and the tail
/// of the oldest one; that oldest segment's count is weighted by the fraction
/// of it still inside the window. This removes most of the fixed window's
/// boundary burst while keeping constant memory.
#[derive(Debug, Clone, Copy)]
pub struct SlidingWindow {
    permit_limit: u64,
    window: Duration,
    segments: u32,
    segment: Duration,
}

/// Sliding window state: `segments + 1` counters, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowState {
    counts: VecDeque<u64>,
    /// Absolute index of the newest (currently filling) segment.
    newest: u64,
}

impl SlidingWindowState {
    /// Counters, oldest first.
    pub fn counts(&self) -> impl Iterator<Item = u64> + '_ {
        self.counts.iter().copied()
    }
}

impl SlidingWindow {
    /// Create a new Sliding Window algorithm instance.
    pub fn new(permit_limit: u64, window: Duration, segments: u32) -> Self {
        let segments = segments.max(1);
        let segment = (window / segments).max(Duration::from_nanos(1));
        Self {
            permit_limit,
            window,
            segments,
            segment,
        }
    }

    fn segment_index(&self, now: Duration) -> u64 {
        (now.as_nanos() / self.segment.as_nanos()) as u64
    }

    /// Fraction of the current segment that has elapsed.
    fn progress(&self, now: Duration) -> f64 {
        let into = now.as_nanos() % self.segment.as_nanos();
        into as f64 / self.segment.as_nanos() as f64
    }

    /// Drop segments that aged out of the window.
    fn advance(&self, state: &mut SlidingWindowState, now: Duration) {
        let index = self.segment_index(now);
        if index <= state.newest {
            return;
        }
        let shift = index - state.newest;
        if shift >= state.counts.len() as u64 {
            state.counts.iter_mut().for_each(|c| *c = 0);
        } else {
            for _ in 0..shift {
                state.counts.pop_front();
                state.counts.push_back(0);
            }
        }
        state.newest = index;
    }

    fn interpolated(&self, state: &SlidingWindowState, now: Duration) -> f64 {
        let oldest = state.counts.front().copied().unwrap_or(0);
        let whole: u64 = state.counts.iter().skip(1).sum();
        whole as f64 + oldest as f64 * (1.0 - self.progress(now))
    }

    fn until_next_segment(&self, now: Duration) -> Duration {
        let into = Duration::from_nanos((now.as_nanos() % self.segment.as_nanos()) as u64);
        self.segment - into
    }

    /// Time until `interpolated + 1 <= limit`, assuming nothing else is granted.
    ///
    /// Walks forward one segment boundary at a time; within a segment the
    /// oldest counter's weight falls linearly, so the crossing point inside
    /// that segment is solved for directly.
    fn time_to_permit(&self, state: &SlidingWindowState, now: Duration) -> Duration {
        let limit = self.permit_limit as f64;
        let f = self.progress(now);
        let seg = self.segment.as_secs_f64();
        let counts: Vec<u64> = state.counts.iter().copied().collect();

        for k in 0..counts.len() {
            let oldest = counts[k] as f64;
            let whole: u64 = counts[k + 1..].iter().sum();
            if whole as f64 + 1.0 > limit {
                continue;
            }
            let budget = limit - 1.0 - whole as f64;
            let needed = if oldest <= budget { 0.0 } else { 1.0 - budget / oldest };
            let wait = (k as f64 + needed - f) * seg;
            if wait > 0.0 {
                return Duration::from_secs_f64(wait);
            }
            if k == 0 {
                return Duration::ZERO;
            }
        }
        self.window
    }
}

impl Algorithm for SlidingWindow {
    type State = SlidingWindowState;

    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn new_state(&self, now: Duration) -> SlidingWindowState {
        SlidingWindowState {
            counts: std::iter::repeat_n(0, self.segments as usize + 1).collect(),
            newest: self.segment_index(now),
        }
    }

    fn try_acquire(&self, state: &mut SlidingWindowState, now: Duration) -> Lease {
        self.advance(state, now);
        let weighted = self.interpolated(state, now);
        let limit = self.permit_limit as f64;

        if weighted + 1.0 <= limit {
            if let Some(current) = state.counts.back_mut() {
                *current += 1;
            }
            let remaining = (limit - weighted - 1.0).max(0.0).floor() as u64;
            Lease::granted(self.permit_limit, remaining, self.until_next_segment(now))
        } else {
            let retry_after = self.time_to_permit(state, now);
            Lease::rejected(self.permit_limit, retry_after, retry_after)
        }
    }

    fn retry_after(&self, state: &SlidingWindowState, now: Duration) -> Duration {
        let mut state = state.clone();
        self.advance(&mut state, now);
        if self.interpolated(&state, now) + 1.0 <= self.permit_limit as f64 {
            Duration::ZERO
        } else {
            self.time_to_permit(&state, now)
        }
    }

    fn horizon(&self) -> Duration {
        self.window + self.segment
    }
}
