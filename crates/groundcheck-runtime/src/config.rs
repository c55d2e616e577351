//! Runtime knobs: check timeout, cache sizing and circuit breaker.

use std::path::Path;
use std::time::Duration;

use groundcheck_core::config::duration;
use groundcheck_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::resilience::CircuitBreakerConfig;

/// Default per-check time budget.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default cache capacity.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Configuration of the [`UnifiedValidator`](crate::UnifiedValidator).
///
/// ```yaml
/// check_timeout: 500ms
/// cache:
///   enabled: true
///   max_entries: 5000
/// circuit_breaker:
///   failure_threshold: 5
///   recovery_timeout: 1m
///   success_threshold: 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Time budget of a single check; exceeding it counts as a non-match
    #[serde(with = "duration")]
    pub check_timeout: Duration,

    pub cache: CacheConfig,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.check_timeout, Duration::from_secs(2));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }

    #[test]
    fn test_from_yaml_with_human_durations() {
        let config = RuntimeConfig::from_yaml(
            r#"
check_timeout: 500ms
cache:
  max_entries: 64
circuit_breaker:
  failure_threshold: 5
  recovery_timeout: 1m
"#,
        )
        .unwrap();

        assert_eq!(config.check_timeout, Duration::from_millis(500));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 64);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.success_threshold, 2);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(RuntimeConfig::from_yaml("{}").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RuntimeConfig::from_yaml("check_timeot: 1s").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        assert!(RuntimeConfig::from_yaml("check_timeout: soon").is_err());
    }
}
