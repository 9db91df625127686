//! Exponential backoff with cap and jitter
//!
//! Delay for retry `n` is `min(max_delay, initial_delay * multiplier^n)`,
//! perturbed uniformly by `±jitter_factor` and clamped to `[0, max_delay]`.
//! A zero jitter factor yields a fully deterministic schedule.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::duration_ms;

/// Backoff tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the base delay used as the jitter range (0.1 = ±10%)
    pub jitter_factor: f64,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_retries: 3,
        }
    }
}

/// Retry delay calculator with an internal retry counter
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current_retry: u32,
    cancel: Option<CancellationToken>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current_retry: 0,
            cancel: None,
        }
    }

    /// Make every retry wait abortable through `token`
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry
    }

    pub fn has_more_retries(&self) -> bool {
        self.current_retry < self.config.max_retries
    }

    pub fn reset(&mut self) {
        self.current_retry = 0;
    }

    /// Unjittered delay for retry `n`
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial_nanos = self.config.initial_delay.as_nanos() as f64;
        let max_nanos = self.config.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let grown = initial_nanos * self.config.multiplier.powi(exponent);

        if !grown.is_finite() || grown >= max_nanos {
            return self.config.max_delay;
        }
        Duration::from_nanos(grown.max(0.0).round() as u64)
    }

    /// Jittered delay for retry `n`; does not touch the retry counter
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        let max_nanos = self.config.max_delay.as_nanos() as f64;
        let jittered = (base.as_nanos() as f64 * factor).clamp(0.0, max_nanos);
        Duration::from_nanos(jittered.round() as u64)
    }

    /// Delay for the current retry, advancing the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_retry(self.current_retry);
        self.current_retry = self.current_retry.saturating_add(1);
        delay
    }

    /// Run `operation`, retrying on every failure until retries run out
    pub async fn execute<T, E, F, Fut>(&mut self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_with_retry(operation, |_| true, |_, _, _| {})
            .await
    }

    /// Run `operation`; on failure consult `should_retry`, notify `on_retry`
    /// with `(retry_number, delay, error)`, wait, and try again. The last
    /// error is returned once retries are exhausted, `should_retry` declines,
    /// or the attached cancellation token fires during a wait.
    pub async fn execute_with_retry<T, E, F, Fut, S, R>(
        &mut self,
        mut operation: F,
        mut should_retry: S,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: FnMut(&E) -> bool,
        R: FnMut(u32, Duration, &E),
        E: std::fmt::Display,
    {
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if self.current_retry > 0 {
                        debug!(retries = self.current_retry, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !should_retry(&error) {
                debug!(error = %error, "Non-retryable error, giving up");
                return Err(error);
            }

            if !self.has_more_retries() {
                warn!(
                    retries = self.current_retry,
                    max_retries = self.config.max_retries,
                    error = %error,
                    "Operation failed after all retry attempts"
                );
                return Err(error);
            }

            let delay = self.next_delay();
            on_retry(self.current_retry, delay, &error);
            debug!(
                retry = self.current_retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying operation after failure"
            );

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Retry wait cancelled");
                            return Err(error);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn deterministic(initial_ms: u64, max_ms: u64, max_retries: u32) -> Backoff {
        Backoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries,
        })
    }

    #[test]
    fn test_deterministic_sequence() {
        let mut backoff = deterministic(100, 1_000, 6);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert!(!backoff.has_more_retries());
    }

    #[test]
    fn test_delay_for_retry_is_pure() {
        let backoff = deterministic(100, 10_000, 3);
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(backoff.current_retry(), 0);
    }

    #[test]
    fn test_reset_zeroes_counter() {
        let mut backoff = deterministic(100, 10_000, 2);
        backoff.next_delay();
        backoff.next_delay();
        assert!(!backoff.has_more_retries());

        backoff.reset();
        assert_eq!(backoff.current_retry(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_huge_retry_saturates_at_max() {
        let backoff = deterministic(100, 5_000, 3);
        assert_eq!(backoff.delay_for_retry(u32::MAX), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_retry_succeeds_after_failures() {
        let mut backoff = deterministic(100, 1_000, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let mut notified = Vec::new();

        let counter = calls.clone();
        let result: Result<u32, String> = backoff
            .execute_with_retry(
                move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(format!("failure {}", n))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| true,
                |retry, delay, _| notified.push((retry, delay)),
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            notified,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_retry_returns_last_error_when_exhausted() {
        let mut backoff = deterministic(10, 100, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = backoff
            .execute(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("attempt {}", n))
                }
            })
            .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_false_stops_immediately() {
        let mut backoff = deterministic(10, 100, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = backoff
            .execute_with_retry(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err("fatal".to_string())
                    }
                },
                |e| e != "fatal",
                |_, _, _| {},
            )
            .await;

        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backoff.current_retry(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_retry_wait() {
        let token = CancellationToken::new();
        let mut backoff = deterministic(60_000, 60_000, 5).with_cancellation(token.clone());
        token.cancel();

        let start = tokio::time::Instant::now();
        let result: Result<(), String> = backoff
            .execute(|| async { Err("down".to_string()) })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn zero_jitter_matches_formula(
            initial_ms in 1u64..2_000,
            max_ms in 1u64..120_000,
            n in 0u32..40,
        ) {
            let backoff = deterministic(initial_ms, max_ms, 10);
            let grown = Duration::from_millis(initial_ms)
                .checked_mul(2u32.checked_pow(n).unwrap_or(u32::MAX))
                .unwrap_or(Duration::MAX);
            let expected = grown.min(Duration::from_millis(max_ms));
            prop_assert_eq!(backoff.delay_for_retry(n), expected);
        }

        #[test]
        fn jittered_delay_stays_in_band(
            initial_ms in 1u64..2_000,
            max_ms in 1u64..120_000,
            n in 0u32..20,
            jitter in 0.01f64..0.9,
        ) {
            let backoff = Backoff::new(BackoffConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier: 2.0,
                jitter_factor: jitter,
                max_retries: 10,
            });
            let base = backoff.base_delay(n).as_nanos() as f64;
            let delay = backoff.delay_for_retry(n).as_nanos() as f64;
            prop_assert!(delay >= (base * (1.0 - jitter)).floor() - 1.0);
            prop_assert!(delay <= (base * (1.0 + jitter)).ceil() + 1.0);
            prop_assert!(delay <= Duration::from_millis(max_ms).as_nanos() as f64);
        }
    }
}
