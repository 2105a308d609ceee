//! Circuit breaker
//!
//! One breaker guards one named dependency. After `failure_threshold`
//! consecutive failures it opens and rejects every call locally until
//! `recovery_timeout` has passed since the last failure; then a single
//! trial call is let through (half-open). The trial's outcome either closes
//! the breaker or re-opens it.

use crate::error::ServiceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed
    #[serde(with = "strata_common::serde_ms")]
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker for a single named dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Dependency name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting Open to HalfOpen if the recovery timeout
    /// has elapsed
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.promote_if_recovered(&mut inner);
        inner.state
    }

    /// Consecutive failures recorded since the last success
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Ask permission to call the dependency.
    ///
    /// # Errors
    /// Returns a `CircuitOpen` error while open, or while a half-open trial
    /// is already in flight.
    pub fn try_acquire(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        self.promote_if_recovered(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                tracing::debug!(dependency = %self.name, "circuit half-open, admitting trial call");
                Ok(())
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(ServiceError::circuit_open(&self.name)),
        }
    }

    /// Record a successful call; closes the breaker
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(dependency = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let reopen = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        inner.trial_in_flight = false;

        if reopen {
            tracing::warn!(
                dependency = %self.name,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
        }
    }

    /// Run `f` under the breaker.
    ///
    /// While open, `f` is not invoked and a `CircuitOpen` error is returned.
    ///
    /// # Errors
    /// Returns the breaker rejection or the error produced by `f`
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.try_acquire()?;
        let mut permit = Permit {
            breaker: self,
            settled: false,
        };

        let result = f().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        permit.settled = true;
        result
    }

    fn promote_if_recovered(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let recovered = inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
        if recovered {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }
}

/// Releases a half-open trial slot if the guarded future is dropped before
/// it settles, so a cancelled trial cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}
