//! Injectable clock for polling, retry backoff and cache TTLs
//!
//! Every component that waits or measures elapsed time goes through the
//! [`Clock`] trait instead of touching `tokio::time` directly, so tests can
//! drive the SUBMITTED -> RUNNING -> SUCCEEDED sequence, TTL expiry and
//! breaker reset timeouts without real delay.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source and suspension point
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration` without blocking the executor
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `tokio::time`
#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests
///
/// `sleep` advances the clock instantly instead of waiting, and `advance`
/// moves time forward explicitly. Lives outside `#[cfg(test)]` so
/// integration tests can use it too.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().expect("clock offset poisoned");
        *offset += duration;
    }

    /// Total simulated time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().expect("clock offset poisoned")
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
