//! Three-state circuit breaker guarding calls to an unreliable dependency
//!
//! ```text
//! closed --failure_threshold consecutive failures--> open
//! open   --reset_timeout since last failure-------> half_open   (lazily, in is_allowed)
//! half_open --half_open_success_threshold successes--> closed
//! half_open --any failure--> open
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CircuitState {
    /// Normal operation, every call passes through
    Closed,
    /// Failing fast
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Rejection returned by [`CircuitBreaker::execute`] while the breaker is open
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Circuit breaker open, retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    half_open_success_count: u32,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            half_open_success_count: 0,
        }
    }
}

/// Thread-safe circuit breaker; share it behind an `Arc` per dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state; does not re-evaluate the open timeout
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Time left before an open breaker may move to half-open
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.inner.lock();
        self.cooldown_left(&inner)
    }

    fn cooldown_left(&self, inner: &BreakerState) -> Duration {
        match (inner.state, inner.last_failure_at) {
            (CircuitState::Open, Some(at)) => self.config.reset_timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// The single call-site check
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.cooldown_left(&inner).is_zero() {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_success_count += 1;
                if inner.half_open_success_count >= self.config.half_open_success_threshold {
                    *inner = BreakerState::closed();
                    info!(breaker = %self.name, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_success_count = 0;
                warn!(breaker = %self.name, "Circuit breaker re-opened from half-open");
            }
            CircuitState::Open => inner.failure_count += 1,
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `operation` through the breaker. The operation's own error is
    /// returned untouched; only a rejected call produces [`CircuitOpen`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        if !self.is_allowed() {
            let retry_after = self.remaining_cooldown();
            debug!(breaker = %self.name, retry_after_ms = retry_after.as_millis() as u64, "Call rejected");
            return Err(CircuitOpen { retry_after }.into());
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Inner(&'static str),
        Open,
    }

    impl From<CircuitOpen> for TestError {
        fn from(_: CircuitOpen) -> Self {
            TestError::Open
        }
    }

    fn breaker(threshold: u32, reset_secs: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(reset_secs),
                half_open_success_threshold: half_open,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let cb = breaker(3, 10, 1);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_closed_resets_failure_count() {
        let cb = breaker(3, 10, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout() {
        let cb = breaker(1, 10, 2);
        cb.record_failure();
        assert!(!cb.is_allowed());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!cb.is_allowed());
        assert!(cb.remaining_cooldown() <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(1, 5, 2);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.is_allowed());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_clock() {
        let cb = breaker(1, 5, 2);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.is_allowed());
        cb.record_success();

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!cb.is_allowed());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_preserves_original_error() {
        let cb = breaker(2, 30, 1);

        let first: Result<(), TestError> = cb.execute(|| async { Err(TestError::Inner("boom")) }).await;
        assert_eq!(first, Err(TestError::Inner("boom")));

        let second: Result<(), TestError> = cb.execute(|| async { Err(TestError::Inner("again")) }).await;
        assert_eq!(second, Err(TestError::Inner("again")));

        let rejected: Result<(), TestError> = cb.execute(|| async { Ok(()) }).await;
        assert_eq!(rejected, Err(TestError::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_success_passes_value() {
        let cb = breaker(2, 30, 1);
        let value: Result<u8, TestError> = cb.execute(|| async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_breaker() {
        let cb = breaker(1, 30, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Open.to_string(), "open");
    }
}
