//! Retry with exponential backoff
//!
//! Only errors whose [`ErrorKind`] is in the policy's retryable set are
//! retried. The delay before retry `n` (0-based) is
//! `min(initial * multiplier^n, max_backoff)`, optionally scaled by a random
//! factor in `[0.5, 1.5)`.

use crate::error::{ErrorKind, ServiceError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "strata_common::serde_ms")]
    pub initial_backoff: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Upper bound on any single delay
    #[serde(with = "strata_common::serde_ms")]
    pub max_backoff: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.5)`
    pub jitter: bool,
    /// Error kinds worth retrying
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: true,
            retryable: ErrorKind::default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With total attempt count
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// With backoff curve
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    /// Enable or disable jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether this policy retries `err`
    #[inline]
    #[must_use]
    pub fn is_retryable(&self, err: &ServiceError) -> bool {
        self.retryable.contains(&err.kind())
    }

    /// Un-jittered delay before retry `retry` (0-based)
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    fn delay_for(&self, retry: u32, err: &ServiceError) -> Duration {
        let mut delay = self.backoff_for(retry);
        if self.jitter {
            let factor: f64 = rand::rng().random_range(0.5..1.5);
            delay = delay.mul_f64(factor);
        }
        match err.retry_after() {
            Some(hint) if hint > delay => hint.min(self.max_backoff),
            _ => delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out.
    ///
    /// # Errors
    /// Returns the last error observed
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && self.is_retryable(&err) => {
                    let delay = self.delay_for(attempt - 1, &err);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        kind = %err.kind(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if attempt > 1 {
                        tracing::warn!(attempt, kind = %err.kind(), "giving up after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
