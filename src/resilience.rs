//! Transient-fault handling: retry with backoff and circuit breaking
//!
//! The retry policy wraps a single upstream call and retries only errors
//! classified as transient, with exponentially increasing backoff between
//! attempts. The circuit breaker sits outside the retry loop, one instance
//! per upstream dependency, so a known-down service fails fast for every
//! concurrent caller instead of each request retrying independently.

use crate::clock::Clock;
use crate::error::{CostPipeError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given 1-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying transient failures up to the attempt bound.
    ///
    /// Non-transient errors fail immediately. The last error is returned
    /// when attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, clock: &dyn Clock, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient failure, retrying");
                    clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; consecutive failures are counted
    Closed,
    /// Calls fail fast until the reset timeout elapses
    Open,
    /// One probe call is in flight
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-dependency circuit breaker
///
/// `Closed -> Open` after `failure_threshold` consecutive failures;
/// `Open -> HalfOpen` once the reset timeout elapses, admitting a single
/// probe; probe success closes the circuit, probe failure reopens it and
/// restarts the timeout.
pub struct CircuitBreaker {
    dependency: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker guarding `dependency`
    pub fn new(
        dependency: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            failure_threshold,
            reset_timeout,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Fails fast with [`CostPipeError::CircuitOpen`] while the circuit is
    /// open, without contacting the upstream.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;
        match op().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Current state, for observability and tests
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(self.open_error()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now().duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_timeout {
                    debug!(dependency = %self.dependency, "breaker half-open, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            debug!(dependency = %self.dependency, "breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip {
            warn!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                "breaker open"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(self.clock.now());
        }
    }

    fn open_error(&self) -> CostPipeError {
        CostPipeError::CircuitOpen {
            dependency: self.dependency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> CostPipeError {
        CostPipeError::UpstreamTimeout("read timeout".to_string())
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let value = policy
            .run(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 200ms then 400ms of backoff were simulated
        assert_eq!(clock.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_retry_stops_at_attempt_bound() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(&clock, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(&clock, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CostPipeError::Validation("bad filter".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(CostPipeError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(1));
    }

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new("cost-api", 5, Duration::from_secs(30), clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<()> {
        b.call(|| async { Err::<(), _>(transient()) }).await
    }

    #[tokio::test]
    async fn test_breaker_trips_after_threshold() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        for _ in 0..5 {
            assert!(fail(&b).await.is_err());
        }
        assert_eq!(b.state().await, BreakerState::Open);

        // The sixth call fails fast without invoking the upstream.
        let calls = AtomicU32::new(0);
        let result = b
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(CostPipeError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_success_closes_circuit() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(30));

        let value = b.call(|| async { Ok(99) }).await.unwrap();
        assert_eq!(value, 99);
        assert_eq!(b.state().await, BreakerState::Closed);

        // Failure counter was reset: a single new failure does not re-trip.
        let _ = fail(&b).await;
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_and_restarts_timeout() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(30));
        let _ = fail(&b).await; // probe fails
        assert_eq!(b.state().await, BreakerState::Open);

        // Timeout restarted: still open before another full reset interval.
        clock.advance(Duration::from_secs(29));
        assert!(matches!(
            fail(&b).await,
            Err(CostPipeError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        b.call(|| async { Ok(()) }).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state().await, BreakerState::Closed);
    }
}
