//! Loading validation configs from YAML or JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{validate_config_schema, AgentConfigSpec, AgentValidationConfig, ConfigError};
use crate::registry::{PatternRegistry, RegistryBuilder};
use crate::validators::ValidatorKind;

fn default_true() -> bool {
    true
}

/// A configuration document: agent types mapped to their settings.
///
/// ```yaml
/// agents:
///   pastry_chef:
///     validator: chef
///     hallucination_threshold: 0.3
///     cache_ttl: 15m
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfigFile {
    /// Also register the built-in agents (chef, receipt, weather, search,
    /// generic) unless the file defines an agent of the same name.
    #[serde(default = "default_true")]
    pub include_builtin_agents: bool,

    pub agents: BTreeMap<String, AgentConfigSpec>,
}

impl ValidationConfigFile {
    /// Parse from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load a file, choosing the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        validate_config_schema(&value).map_err(ConfigError::Schema)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Compile every agent and build a registry.
    pub fn into_registry(&self) -> Result<PatternRegistry, ConfigError> {
        let mut builder = RegistryBuilder::new();

        if self.include_builtin_agents {
            for kind in ValidatorKind::ALL {
                if !self.agents.contains_key(kind.as_str()) {
                    builder.register_agent_config(kind.as_str(), AgentValidationConfig::builtin(kind)?)?;
                }
            }
        }

        for (agent_type, spec) in &self.agents {
            builder.register_agent_config(agent_type, spec.compile(agent_type)?)?;
        }

        tracing::debug!(
            agents = self.agents.len(),
            include_builtin = self.include_builtin_agents,
            "Loaded validation config"
        );

        builder.build()
    }
}
