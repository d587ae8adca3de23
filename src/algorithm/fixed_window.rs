//! Fixed Window admission algorithm.

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::Lease;

/// Fixed Window admission algorithm.
///
/// Counts grants in a window that opens on the first request after the
/// previous one expired. Simple and cheap, but up to twice the limit can get
/// through around a window boundary: a full window's worth at the very end of
/// one window and another at the start of the next.
#[derive(Debug, Clone, Copy)]
pub struct FixedWindow {
    permit_limit: u64,
    window: Duration,
}

/// Fixed window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowState {
    /// Grants in the current window.
    pub count: u64,
    /// Start of the current window.
    pub window_start: Duration,
}

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new(permit_limit: u64, window: Duration) -> Self {
        Self {
            permit_limit,
            window,
        }
    }

    fn roll(&self, state: &mut FixedWindowState, now: Duration) {
        if now >= state.window_start + self.window {
            state.count = 0;
            state.window_start = now;
        }
    }

    fn time_left(&self, state: &FixedWindowState, now: Duration) -> Duration {
        (state.window_start + self.window).saturating_sub(now)
    }
}

impl Algorithm for FixedWindow {
    type State = FixedWindowState;

    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn new_state(&self, now: Duration) -> FixedWindowState {
        FixedWindowState {
            count: 0,
            window_start: now,
        }
    }

    fn try_acquire(&self, state: &mut FixedWindowState, now: Duration) -> Lease {
        self.roll(state, now);
        let reset = self.time_left(state, now);

        if state.count < self.permit_limit {
            state.count += 1;
            Lease::granted(self.permit_limit, self.permit_limit - state.count, reset)
        } else {
            Lease::rejected(self.permit_limit, reset, reset)
        }
    }

    fn retry_after(&self, state: &FixedWindowState, now: Duration) -> Duration {
        if now >= state.window_start + self.window || state.count < self.permit_limit {
            Duration::ZERO
        } else {
            self.time_left(state, now)
        }
    }

    fn horizon(&self) -> Duration {
        self.window
    }
}
