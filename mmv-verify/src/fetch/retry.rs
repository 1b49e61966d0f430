//! Declarative retry policy
//!
//! One policy is applied uniformly by the fetch task runner instead of
//! retry loops at each call site. Delay for attempt `n` (0-based) is
//! `min(base * 2^n, max)`, spread by `±jitter_ratio`. A rate-limit error
//! carrying a `retry_after` hint waits at least that long.

use crate::config::FetchConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Outcome of running an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub result: Result<T, FetchError>,
    /// Attempts made, including the first
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay to randomise, in [0, 1]
    pub jitter_ratio: f64,
    pub is_retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            jitter_ratio: config.jitter_ratio,
            is_retryable: FetchError::is_retryable,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0 for the first retry)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter_ratio <= 0.0 || exponential.is_zero() {
            return exponential;
        }
        let spread: f64 = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        exponential.mul_f64((1.0 + spread).max(0.0))
    }

    /// Delay for a failed attempt, honoring any source-provided hint
    fn delay_after(&self, attempt: u32, err: &FetchError) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match err.retry_after() {
            Some(hint) => hint.max(backoff),
            None => backoff,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or retries are exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let retries_used = attempt - 1;
            if !(self.is_retryable)(&err) || retries_used >= self.max_retries {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let delay = self.delay_after(retries_used, &err);
            debug!(
                operation = label,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Retryable fetch error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
