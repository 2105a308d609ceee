//! Orchestrator configuration
//!
//! Loaded from TOML; every field has a default so a partial file (or none)
//! is valid.
//!
//! ```toml
//! worker_pool_size = 8
//! materialize_child_dependencies = true
//!
//! [resilience.retry]
//! max_attempts = 5
//!
//! [dependencies.decomposition.breaker]
//! failure_threshold = 3
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strata_cache::CacheConfig;
use strata_resilience::{ResilienceConfig, ResilienceRegistry};

/// Dependency name used for leaf-task reasoning calls
pub const REASONING_DEPENDENCY: &str = "reasoning";

/// Dependency name used for decomposition calls
pub const DECOMPOSITION_DEPENDENCY: &str = "decomposition";

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum tasks in flight at once
    pub worker_pool_size: usize,
    /// Back up targets before applying output and restore them on failure
    pub rollback_enabled: bool,
    /// Make a decomposed parent wait for its children before completing
    pub materialize_child_dependencies: bool,
    /// Upper bound on children from one decomposition
    pub max_subtasks_per_task: usize,
    /// Cache scope; defaults to the task kind
    pub cache_scope: Option<String>,
    /// Caller/callee hops included in leaf prompts
    pub context_depth: usize,
    /// Output budget per reasoning call
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    /// Root that task targets are relative to
    pub project_root: PathBuf,
    /// Result cache tuning
    pub cache: CacheConfig,
    /// Resilience defaults for every dependency
    pub resilience: ResilienceConfig,
    /// Per-dependency overrides keyed by dependency name
    pub dependencies: BTreeMap<String, ResilienceConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            rollback_enabled: true,
            materialize_child_dependencies: false,
            max_subtasks_per_task: 50,
            cache_scope: None,
            context_depth: 2,
            max_output_tokens: 4096,
            temperature: 0.2,
            event_capacity: 1024,
            project_root: PathBuf::from("."),
            cache: CacheConfig::default(),
            resilience: ResilienceConfig::default(),
            dependencies: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// With worker pool size
    #[inline]
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Enable or disable rollback
    #[inline]
    #[must_use]
    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_enabled = enabled;
        self
    }

    /// Enable or disable parent-waits-for-children mode
    #[inline]
    #[must_use]
    pub fn with_materialized_children(mut self, enabled: bool) -> Self {
        self.materialize_child_dependencies = enabled;
        self
    }

    /// With subtask limit
    #[inline]
    #[must_use]
    pub fn with_max_subtasks(mut self, max: usize) -> Self {
        self.max_subtasks_per_task = max;
        self
    }

    /// With fixed cache scope
    #[inline]
    #[must_use]
    pub fn with_cache_scope(mut self, scope: impl Into<String>) -> Self {
        self.cache_scope = Some(scope.into());
        self
    }

    /// With project root
    #[inline]
    #[must_use]
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// With resilience defaults
    #[inline]
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// With an override for one dependency
    #[inline]
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, config: ResilienceConfig) -> Self {
        self.dependencies.insert(name.into(), config);
        self
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`OrchestratorConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// [`ConfigError::Serialize`] on serializer failure
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("worker_pool_size must be at least 1".into()));
        }
        if self.max_subtasks_per_task == 0 {
            return Err(ConfigError::Invalid(
                "max_subtasks_per_task must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.cache.max_capacity == 0 {
            return Err(ConfigError::Invalid("cache.max_capacity must be at least 1".into()));
        }
        let overrides = self.dependencies.iter().map(|(k, v)| (k.as_str(), v));
        for (name, resilience) in std::iter::once(("defaults", &self.resilience)).chain(overrides) {
            if resilience.retry.multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: retry multiplier must be at least 1.0"
                )));
            }
            if resilience.breaker.failure_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: breaker failure_threshold must be at least 1"
                )));
            }
            if resilience.rate_limit.max_requests == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: rate_limit max_requests must be at least 1"
                )));
            }
            if resilience.rate_limit.max_cost == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: rate_limit max_cost must be at least 1"
                )));
            }
            if resilience.attempt_timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name}: attempt_timeout must be positive"
                )));
            }
            if resilience.deadline.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::Invalid(format!("{name}: deadline must be positive")));
            }
        }
        Ok(())
    }

    /// Registry with the defaults and every per-dependency override
    #[must_use]
    pub fn resilience_registry(&self) -> ResilienceRegistry {
        self.dependencies.iter().fold(
            ResilienceRegistry::new(self.resilience.clone()),
            |registry, (name, config)| registry.with_dependency(name.clone(), config.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = OrchestratorConfig::from_toml_str(
            r#"
            worker_pool_size = 8
            cache_scope = "review"

            [resilience]
            attempt_timeout = 5000

            [resilience.retry]
            max_attempts = 5

            [dependencies.decomposition.breaker]
            failure_threshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(cfg.worker_pool_size, 8);
        assert_eq!(cfg.cache_scope.as_deref(), Some("review"));
        assert_eq!(cfg.resilience.retry.max_attempts, 5);
        assert_eq!(cfg.resilience.attempt_timeout, Duration::from_secs(5));
        assert!(cfg.rollback_enabled);

        let registry = cfg.resilience_registry();
        assert_eq!(
            registry.config_for(DECOMPOSITION_DEPENDENCY).breaker.failure_threshold,
            2
        );
        assert_eq!(
            registry.config_for(REASONING_DEPENDENCY).retry.max_attempts,
            5
        );
    }

    #[test]
    fn invalid_values_rejected() {
        let err = OrchestratorConfig::from_toml_str("worker_pool_size = 0").unwrap_err();
        assert!(err.to_string().contains("worker_pool_size"));

        let err = OrchestratorConfig::from_toml_str("temperature = 9.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = OrchestratorConfig::from_toml_str("worker_pool_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_budgets_rejected() {
        let err = OrchestratorConfig::from_toml_str("[resilience.rate_limit]\nmax_cost = 0").unwrap_err();
        assert!(err.to_string().contains("max_cost"));

        let err = OrchestratorConfig::from_toml_str("[resilience]\nattempt_timeout = 0").unwrap_err();
        assert!(err.to_string().contains("attempt_timeout"));

        let err = OrchestratorConfig::from_toml_str("[dependencies.reasoning]\ndeadline = 0").unwrap_err();
        assert!(err.to_string().contains("reasoning: deadline"));
    }

    #[test]
    fn renders_and_reloads() {
        let cfg = OrchestratorConfig::default()
            .with_worker_pool_size(3)
            .with_materialized_children(true)
            .with_cache_scope("fix");
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(OrchestratorConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = OrchestratorConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
