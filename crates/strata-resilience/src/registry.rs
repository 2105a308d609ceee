//! Named dependency registry
//!
//! Hands out one shared breaker and limiter per dependency name. A registry
//! is constructed explicitly and owned by whoever drives a run, so separate
//! runs in one process never share breaker or limiter state by accident.

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::layer::{ResilienceConfig, ResilienceLayer};
use crate::limiter::{RateLimitUsage, RateLimiter};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot of one dependency's guard state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    /// Dependency name
    pub name: String,
    /// Breaker state
    pub state: CircuitState,
    /// Consecutive failures
    pub consecutive_failures: u32,
    /// Current window usage
    pub usage: RateLimitUsage,
}

/// Registry of guarded dependencies
#[derive(Debug, Default)]
pub struct ResilienceRegistry {
    defaults: ResilienceConfig,
    overrides: HashMap<String, ResilienceConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl ResilienceRegistry {
    /// Create a registry applying `defaults` to every dependency
    #[must_use]
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Use a dedicated configuration for `name`
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, config: ResilienceConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Configuration applying to `name`
    #[must_use]
    pub fn config_for(&self, name: &str) -> &ResilienceConfig {
        self.overrides.get(name).unwrap_or(&self.defaults)
    }

    /// Layer for `name`, sharing breaker and limiter with every other layer
    /// obtained for the same name
    #[must_use]
    pub fn layer(&self, name: &str) -> ResilienceLayer {
        let config = self.config_for(name);
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.breaker)))
            .clone();
        let limiter = self
            .limiters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(name, config.rate_limit)))
            .clone();
        ResilienceLayer::from_parts(breaker, limiter, config)
    }

    /// Health of every dependency used so far, sorted by name
    #[must_use]
    pub fn health(&self) -> Vec<DependencyHealth> {
        let mut out: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| {
                let usage = self
                    .limiters
                    .get(entry.key())
                    .map(|l| l.usage())
                    .unwrap_or_default();
                DependencyHealth {
                    name: entry.key().clone(),
                    state: entry.value().state(),
                    consecutive_failures: entry.value().failure_count(),
                    usage,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use std::time::Duration;

    #[test]
    fn layers_share_breaker_per_name() {
        let registry = ResilienceRegistry::new(ResilienceConfig::default());
        let a = registry.layer("reasoning");
        let b = registry.layer("reasoning");
        let other = registry.layer("decomposition");

        a.breaker().record_failure();
        assert_eq!(b.breaker().failure_count(), 1);
        assert_eq!(other.breaker().failure_count(), 0);
    }

    #[test]
    fn overrides_apply_per_dependency() {
        let strict = ResilienceConfig {
            breaker: BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(5),
            },
            ..ResilienceConfig::default()
        };
        let registry =
            ResilienceRegistry::new(ResilienceConfig::default()).with_dependency("reasoning", strict);

        registry.layer("reasoning").breaker().record_failure();
        registry.layer("decomposition").breaker().record_failure();

        let health = registry.health();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].name, "decomposition");
        assert_eq!(health[0].state, CircuitState::Closed);
        assert_eq!(health[1].state, CircuitState::Open);
    }

    #[test]
    fn independent_registries_do_not_share_state() {
        let first = ResilienceRegistry::new(ResilienceConfig::default());
        let second = ResilienceRegistry::new(ResilienceConfig::default());
        first.layer("reasoning").breaker().record_failure();
        assert_eq!(second.layer("reasoning").breaker().failure_count(), 0);
    }
}
