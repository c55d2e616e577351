//! Circuit breaker over failing validators.
//!
//! When a validator fails repeatedly for one agent type, the circuit opens
//! and subsequent calls for that agent immediately get the fallback result.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use groundcheck_core::config::duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "duration")]
    pub recovery_timeout: Duration,

    /// Successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Validation is skipped, callers get the fallback result
    Open { opened_at: Instant },

    /// Testing if circuit can close
    HalfOpen { successes: u32 },
}

/// Per-agent-type circuit breaker.
///
/// Each agent type has its own circuit so one misbehaving agent does not
/// degrade validation for the others.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// True if validation for `agent_type` should be skipped.
    pub fn is_open(&self, agent_type: &str) -> bool {
        let states = self.states.read();
        match states.get(agent_type) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(agent_type);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, agent_type: &str) {
        let mut states = self.states.write();
        match states.get(agent_type).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(agent_type.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(agent_type = %agent_type, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        agent_type.to_string(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(agent_type.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, agent_type: &str) {
        let mut states = self.states.write();
        let failures = match states.get(agent_type).cloned() {
            None => 0,
            Some(CircuitState::Closed { failures }) => failures,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    agent_type.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(agent_type = %agent_type, "Circuit reopened after failed recovery attempt");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures + 1 >= self.config.failure_threshold {
            states.insert(
                agent_type.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(
                agent_type = %agent_type,
                failures = failures + 1,
                "Circuit opened after repeated validator failures"
            );
        } else {
            states.insert(
                agent_type.to_string(),
                CircuitState::Closed {
                    failures: failures + 1,
                },
            );
        }
    }

    fn transition_to_half_open(&self, agent_type: &str) {
        let mut states = self.states.write();
        if matches!(states.get(agent_type), Some(CircuitState::Open { .. })) {
            states.insert(agent_type.to_string(), CircuitState::HalfOpen { successes: 0 });
            tracing::info!(agent_type = %agent_type, "Circuit half-open, trying validator again");
        }
    }

    pub fn state(&self, agent_type: &str) -> CircuitState {
        self.states
            .read()
            .get(agent_type)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Close every circuit.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            success_threshold: 2,
        })
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open("chef"));
        assert_eq!(cb.state("chef"), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = breaker(2, Duration::from_secs(30));

        cb.record_failure("chef");
        assert!(!cb.is_open("chef"));

        cb.record_failure("chef");
        assert!(cb.is_open("chef"));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();
        cb.record_failure("chef");
        cb.record_failure("chef");
        cb.record_success("chef");

        cb.record_failure("chef");
        cb.record_failure("chef");
        assert!(!cb.is_open("chef"));
    }

    #[test]
    fn test_agents_are_independent() {
        let cb = breaker(2, Duration::from_secs(30));
        cb.record_failure("chef");
        cb.record_failure("chef");

        assert!(cb.is_open("chef"));
        assert!(!cb.is_open("receipt"));
    }

    #[test]
    fn test_recovery_through_half_open() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure("weather");
        assert!(matches!(cb.state("weather"), CircuitState::Open { .. }));

        // Zero recovery timeout: the next probe half-opens immediately
        assert!(!cb.is_open("weather"));
        assert_eq!(cb.state("weather"), CircuitState::HalfOpen { successes: 0 });

        cb.record_success("weather");
        assert_eq!(cb.state("weather"), CircuitState::HalfOpen { successes: 1 });
        cb.record_success("weather");
        assert_eq!(cb.state("weather"), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_failure_while_half_open_reopens() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure("search");
        assert!(!cb.is_open("search"));

        cb.record_failure("search");
        assert!(matches!(cb.state("search"), CircuitState::Open { .. }));
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, Duration::from_secs(30));
        cb.record_failure("chef");
        assert!(cb.is_open("chef"));

        cb.reset();
        assert!(!cb.is_open("chef"));
    }
}
