//! Strata Resilience
//!
//! Guards every call to an external dependency:
//! - [`RateLimiter`]: request-count and cost budget over a rolling window
//! - [`CircuitBreaker`]: stops calling a failing dependency for a cooldown
//! - [`RetryPolicy`]: exponential backoff over a retryable set of [`ErrorKind`]s
//! - [`with_timeout`]: per-attempt and overall deadlines
//!
//! [`ResilienceLayer`] composes them; [`ResilienceRegistry`] shares one
//! breaker and limiter per named dependency.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_resilience::{ResilienceConfig, ResilienceRegistry, ServiceError};
//!
//! # async fn example() -> Result<(), ServiceError> {
//! let registry = ResilienceRegistry::new(ResilienceConfig::default());
//! let layer = registry.layer("reasoning");
//! let text = layer.call(1_000, || async { Ok::<_, ServiceError>("hi") }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod breaker;
pub mod error;
pub mod layer;
pub mod limiter;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use error::{ErrorKind, ServiceError};
pub use layer::{ResilienceConfig, ResilienceLayer};
pub use limiter::{RateLimitConfig, RateLimitUsage, RateLimiter, Reservation};
pub use registry::{DependencyHealth, ResilienceRegistry};
pub use retry::RetryPolicy;
pub use timeout::with_timeout;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
