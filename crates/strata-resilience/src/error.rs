//! Error classification for external calls
//!
//! Every failure of a guarded dependency is reduced to a [`ServiceError`]
//! carrying an [`ErrorKind`]. Retry decisions, breaker accounting and
//! task-level reporting all key off the kind, never off message text.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dependency asked us to slow down
    RateLimited,
    /// Dependency is temporarily over capacity
    Overloaded,
    /// Attempt or deadline expired
    Timeout,
    /// Generic transient failure (connection reset, 5xx)
    Transient,
    /// Rejected locally by an open circuit breaker
    CircuitOpen,
    /// Request was rejected as invalid
    InvalidRequest,
    /// Response could not be interpreted
    Malformed,
    /// Anything else
    Other,
}

impl ErrorKind {
    /// Kinds retried by default
    #[must_use]
    pub fn default_retryable() -> HashSet<ErrorKind> {
        [
            ErrorKind::RateLimited,
            ErrorKind::Overloaded,
            ErrorKind::Timeout,
            ErrorKind::Transient,
        ]
        .into_iter()
        .collect()
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transient => "transient",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Other => "other",
        }
    }

    /// Best-effort classification of a raw provider error message.
    ///
    /// Adapters that only get a status line or message back use this to
    /// pick a kind; adapters with structured errors should map directly.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["429", "rate limit", "rate_limit", "too many requests"]) {
            ErrorKind::RateLimited
        } else if has(&["529", "overloaded", "capacity"]) {
            ErrorKind::Overloaded
        } else if has(&["timeout", "timed out", "deadline"]) {
            ErrorKind::Timeout
        } else if has(&[
            "500",
            "502",
            "503",
            "504",
            "connection",
            "reset",
            "unavailable",
            "temporar",
        ]) {
            ErrorKind::Transient
        } else if has(&["400", "invalid", "bad request"]) {
            ErrorKind::InvalidRequest
        } else {
            ErrorKind::Other
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a call to an external dependency
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
}

impl ServiceError {
    /// Create an error of the given kind
    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify a raw message with [`ErrorKind::classify`]
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify(&message), message)
    }

    /// Rate limited by the dependency
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Dependency overloaded
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overloaded, message)
    }

    /// Operation exceeded `limit`
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timed out after {}ms", limit.as_millis()),
        )
    }

    /// Generic transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Call rejected because the breaker for `dependency` is open
    #[must_use]
    pub fn circuit_open(dependency: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit open for '{dependency}'"),
        )
    }

    /// Request rejected as invalid
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Response could not be interpreted
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    /// Attach a server-provided retry hint
    #[inline]
    #[must_use]
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    /// Classified kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable detail
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Server-provided retry hint, if any
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Whether the breaker rejected this call
    #[inline]
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }
}
