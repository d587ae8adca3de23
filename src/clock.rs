//! Monotonic clocks for window and refill arithmetic.
//!
//! Every limiter reads time through a [`Clock`] so that tests can drive window
//! boundaries and token refills without sleeping. Time is reported as the
//! offset since the clock's own origin.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Source of monotonic time.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since this clock's origin. Never decreases.
    fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Clock backed by the tokio timer.
///
/// Uses `tokio::time::Instant`, so it follows paused/advanced time in tests
/// that run with `start_paused = true`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same time, so a clock handed to an engine can still be
/// advanced from the test body.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock();
        *offset += duration;
    }

    /// Jump to an absolute offset. Going backwards is ignored.
    pub fn set(&self, to: Duration) {
        let mut offset = self.offset.lock();
        if to > *offset {
            *offset = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.offset.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));

        handle.set(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(5));

        handle.set(Duration::from_secs(61));
        assert_eq!(clock.now(), Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(clock.now() >= Duration::from_secs(10));
    }
}
