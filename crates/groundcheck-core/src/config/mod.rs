//! Per-agent validation configuration.
//!
//! Configs are built in code ([`AgentValidationConfig::builtin`] and the
//! `with_*` builders) or loaded from a YAML/JSON [`ValidationConfigFile`]
//! that is checked against an embedded JSON Schema before deserialization.

mod agent;
pub mod duration;
mod file;
mod schema;

pub use agent::{
    AgentConfigSpec, AgentValidationConfig, Thresholds, Weights, DEFAULT_CACHE_TTL,
    DEFAULT_CRITICAL_WEIGHT, DEFAULT_WARNING_WEIGHT, FLAG_ALLOW_ADDITIONAL_INGREDIENTS,
    FLAG_MAX_ADDITIONAL_INGREDIENTS,
};
pub use file::ValidationConfigFile;
pub use schema::{is_valid_config, validate_config_schema};

use thiserror::Error;

use crate::patterns::PatternError;

/// Errors raised while building or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Invalid config for agent '{agent_type}': {reason}")]
    Invalid { agent_type: String, reason: String },

    #[error("Agent type registered twice: {0}")]
    DuplicateAgent(String),

    #[error("No configuration registered for agent type: {0}")]
    Missing(String),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

impl ConfigError {
    pub(crate) fn invalid(agent_type: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            agent_type: agent_type.to_string(),
            reason: reason.into(),
        }
    }
}
