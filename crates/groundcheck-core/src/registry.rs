//! Agent type → (config, validator) lookup.
//!
//! The registry is built once at startup and never mutated afterwards; share
//! it behind an `Arc`. Unknown agent types resolve to the generic config so
//! that every response can be validated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{AgentValidationConfig, ConfigError};
use crate::patterns::PatternRule;
use crate::types::ValidationLevel;
use crate::validators::{Validator, ValidatorKind};

/// Agent type used when a lookup misses.
pub const GENERIC_AGENT: &str = "generic";

#[derive(Clone)]
struct Entry {
    config: Arc<AgentValidationConfig>,
    validator: Arc<dyn Validator>,
}

/// The outcome of resolving an agent type.
#[derive(Clone)]
pub struct Resolved {
    pub config: Arc<AgentValidationConfig>,
    pub validator: Arc<dyn Validator>,

    /// False when the agent type was unknown and the generic entry was used
    pub registered: bool,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("validator", &self.validator.name())
            .field("level", &self.config.validation_level)
            .field("registered", &self.registered)
            .finish()
    }
}

/// Collects agent registrations.
#[derive(Default)]
pub struct RegistryBuilder {
    agents: BTreeMap<String, Entry>,
}

impl RegistryBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder pre-populated with the built-in agents.
    pub fn with_builtin_agents() -> Result<Self, ConfigError> {
        let mut builder = Self::new();
        for kind in ValidatorKind::ALL {
            builder.register_agent_config(kind.as_str(), AgentValidationConfig::builtin(kind)?)?;
        }
        Ok(builder)
    }

    /// Register an agent served by its config's built-in validator.
    pub fn register_agent_config(
        &mut self,
        agent_type: impl Into<String>,
        config: AgentValidationConfig,
    ) -> Result<&mut Self, ConfigError> {
        let validator = config.validator.validator();
        self.register_validator(agent_type, config, validator)
    }

    /// Register an agent served by a custom validator implementation.
    pub fn register_validator(
        &mut self,
        agent_type: impl Into<String>,
        config: AgentValidationConfig,
        validator: Arc<dyn Validator>,
    ) -> Result<&mut Self, ConfigError> {
        let agent_type = agent_type.into();
        if self.agents.contains_key(&agent_type) {
            return Err(ConfigError::DuplicateAgent(agent_type));
        }

        config.validate(&agent_type)?;
        self.agents.insert(
            agent_type,
            Entry {
                config: Arc::new(config),
                validator,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> Result<PatternRegistry, ConfigError> {
        let fallback = match self.agents.get(GENERIC_AGENT) {
            Some(entry) => entry.clone(),
            None => {
                let config = AgentValidationConfig::builtin(ValidatorKind::Generic)?;
                Entry {
                    validator: config.validator.validator(),
                    config: Arc::new(config),
                }
            }
        };

        Ok(PatternRegistry {
            agents: self.agents,
            fallback,
        })
    }
}

/// Immutable lookup from agent type to config and validator.
pub struct PatternRegistry {
    agents: BTreeMap<String, Entry>,
    fallback: Entry,
}

impl PatternRegistry {
    /// A registry holding only the built-in agents.
    pub fn builtin() -> Result<Self, ConfigError> {
        RegistryBuilder::with_builtin_agents()?.build()
    }

    /// Config and validator for `agent_type`; the generic entry if unknown.
    pub fn resolve(&self, agent_type: &str) -> Resolved {
        match self.agents.get(agent_type) {
            Some(entry) => Resolved {
                config: Arc::clone(&entry.config),
                validator: Arc::clone(&entry.validator),
                registered: true,
            },
            None => {
                tracing::debug!(
                    agent_type = %agent_type,
                    fallback = GENERIC_AGENT,
                    "No configuration for agent type, using generic validator"
                );
                Resolved {
                    config: Arc::clone(&self.fallback.config),
                    validator: Arc::clone(&self.fallback.validator),
                    registered: false,
                }
            }
        }
    }

    /// Strict lookup without fallback.
    pub fn config(&self, agent_type: &str) -> Result<Arc<AgentValidationConfig>, ConfigError> {
        self.agents
            .get(agent_type)
            .map(|entry| Arc::clone(&entry.config))
            .ok_or_else(|| ConfigError::Missing(agent_type.to_string()))
    }

    /// Pattern rules that run for `agent_type` at `level`.
    pub fn rules_for(&self, agent_type: &str, level: ValidationLevel) -> Vec<&PatternRule> {
        let entry = self.agents.get(agent_type).unwrap_or(&self.fallback);
        entry.config.rules_at(level).collect()
    }

    /// Registered agent types in sorted order.
    pub fn agent_types(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for PatternRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRegistry")
            .field("agents", &self.agent_types())
            .finish()
    }
}
