//! Composed resilience layer
//!
//! Applies the primitives outside-in:
//!
//! ```text
//! RateLimiter → CircuitBreaker → Deadline → Retry → Timeout (per attempt) → call
//! ```
//!
//! A breaker rejection therefore never consumes retry budget, and the
//! breaker sees one outcome per guarded call rather than one per attempt.

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::error::ServiceError;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;
use crate::timeout::with_timeout;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one guarded dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy
    pub retry: RetryPolicy,
    /// Breaker tuning
    pub breaker: BreakerConfig,
    /// Rate limiter tuning
    pub rate_limit: RateLimitConfig,
    /// Limit on each individual attempt
    #[serde(with = "strata_common::serde_ms")]
    pub attempt_timeout: Duration,
    /// Optional limit on the whole retry sequence
    #[serde(with = "strata_common::serde_ms::option")]
    pub deadline: Option<Duration>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            attempt_timeout: Duration::from_secs(120),
            deadline: None,
        }
    }
}

/// A dependency's breaker, limiter and policies bundled for calling
#[derive(Debug, Clone)]
pub struct ResilienceLayer {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    deadline: Option<Duration>,
}

impl ResilienceLayer {
    /// Build a standalone layer with its own breaker and limiter
    #[must_use]
    pub fn new(name: &str, config: &ResilienceConfig) -> Self {
        Self::from_parts(
            Arc::new(CircuitBreaker::new(name, config.breaker)),
            Arc::new(RateLimiter::new(name, config.rate_limit)),
            config,
        )
    }

    /// Build a layer around shared breaker and limiter instances
    #[must_use]
    pub fn from_parts(
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        config: &ResilienceConfig,
    ) -> Self {
        Self {
            breaker,
            limiter,
            retry: config.retry.clone(),
            attempt_timeout: config.attempt_timeout,
            deadline: config.deadline,
        }
    }

    /// Dependency name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Breaker guarding this dependency
    #[inline]
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Limiter guarding this dependency
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Shortcut for the breaker state
    #[inline]
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Guard `op`, leaving the estimated cost in place on success
    ///
    /// # Errors
    /// See [`ResilienceLayer::call_metered`]
    pub async fn call<T, F, Fut>(&self, estimated_cost: u64, op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.call_metered(estimated_cost, op, |_| None).await
    }

    /// Guard `op` and correct the limiter with the cost reported by
    /// `actual_cost` on success.
    ///
    /// # Errors
    /// Returns `CircuitOpen` without invoking `op` while the breaker is open;
    /// the rejected call gives its limiter slot back. Otherwise
    /// `Timeout` if an attempt or the overall deadline expires, or the last
    /// error `op` produced once retries are exhausted or a non-retryable
    /// error occurs.
    pub async fn call_metered<T, F, Fut, C>(
        &self,
        estimated_cost: u64,
        op: F,
        actual_cost: C,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
        C: FnOnce(&T) -> Option<u64>,
    {
        let reservation = self.limiter.acquire(estimated_cost).await;

        let attempt_timeout = self.attempt_timeout;
        let retry = &self.retry;
        let deadline = self.deadline;

        let result = self
            .breaker
            .call(|| async move {
                let mut op = op;
                let retried = retry.run(|| with_timeout(attempt_timeout, op()));
                match deadline {
                    Some(limit) => with_timeout(limit, retried).await,
                    None => retried.await,
                }
            })
            .await;

        match &result {
            Ok(value) => {
                if let Some(cost) = actual_cost(value) {
                    self.limiter.record_actual(&reservation, cost);
                }
            }
            Err(err) if err.is_circuit_open() => self.limiter.release(&reservation),
            Err(err) => {
                tracing::warn!(dependency = %self.name(), kind = %err.kind(), error = %err, "guarded call failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::limiter::RateLimitUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_backoff(Duration::from_millis(10), 2.0, Duration::from_millis(100))
                .with_jitter(false),
            breaker: BreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
            },
            rate_limit: RateLimitConfig::default(),
            attempt_timeout: Duration::from_millis(200),
            deadline: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_then_retries() {
        let layer = ResilienceLayer::new("reasoning", &config());
        let calls = AtomicU32::new(0);

        let value = layer
            .call(10, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, ServiceError>("ok")
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(layer.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_count_once_against_breaker() {
        let layer = ResilienceLayer::new("reasoning", &config());
        let calls = AtomicU32::new(0);

        let err = layer
            .call(10, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ServiceError::transient("down"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(layer.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_and_releases_slot() {
        let layer = ResilienceLayer::new("reasoning", &config());
        for _ in 0..2 {
            let _ = layer
                .call(10, || async { Err::<(), _>(ServiceError::invalid("nope")) })
                .await;
        }
        assert_eq!(layer.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let err = layer
            .call(500, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(layer.limiter().usage(), RateLimitUsage { requests: 2, cost: 20 });
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejections_never_wait_on_the_limiter() {
        let mut cfg = config();
        cfg.breaker.failure_threshold = 1;
        cfg.rate_limit.max_requests = 2;
        let layer = ResilienceLayer::new("reasoning", &cfg);

        let _ = layer
            .call(1, || async { Err::<(), _>(ServiceError::invalid("nope")) })
            .await;
        assert_eq!(layer.state(), CircuitState::Open);

        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            let err = layer
                .call(1, || async { Ok::<_, ServiceError>(()) })
                .await
                .unwrap_err();
            assert!(err.is_circuit_open());
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(layer.limiter().usage().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_whole_sequence() {
        let mut cfg = config();
        cfg.deadline = Some(Duration::from_millis(15));
        let layer = ResilienceLayer::new("reasoning", &cfg);

        let err = layer
            .call(1, || async { Err::<(), _>(ServiceError::transient("flaky")) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn metered_call_reports_actual_cost() {
        let layer = ResilienceLayer::new("reasoning", &config());
        layer
            .call_metered(1_000, || async { Ok::<_, ServiceError>(42u64) }, |v| Some(*v))
            .await
            .unwrap();
        assert_eq!(layer.limiter().usage().cost, 42);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ResilienceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
