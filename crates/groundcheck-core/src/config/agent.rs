//! The per-agent configuration and its file representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use super::ConfigError;
use crate::patterns::{PatternRule, PatternSpec};
use crate::types::{Severity, ValidationLevel};
use crate::validators::ValidatorKind;

/// Cache lifetime used when a config does not set one.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

pub const DEFAULT_CRITICAL_WEIGHT: f64 = 0.3;
pub const DEFAULT_WARNING_WEIGHT: f64 = 0.1;

/// Chef flag: tolerate ingredients outside `available_ingredients`.
pub const FLAG_ALLOW_ADDITIONAL_INGREDIENTS: &str = "allow_additional_ingredients";

/// Chef flag: how many unlisted ingredients are tolerated when allowed.
pub const FLAG_MAX_ADDITIONAL_INGREDIENTS: &str = "max_additional_ingredients";

/// Decision thresholds, calibrated for the config's own level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Results below this confidence are at least WARN
    pub confidence: f64,

    /// Results at or above this score are REJECT
    pub hallucination: f64,
}

/// Score contribution of one match per severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub critical: f64,
    pub warning: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            critical: DEFAULT_CRITICAL_WEIGHT,
            warning: DEFAULT_WARNING_WEIGHT,
        }
    }
}

/// Validation settings for one agent type. Immutable once registered.
#[derive(Debug, Clone)]
pub struct AgentValidationConfig {
    pub validator: ValidatorKind,
    pub validation_level: ValidationLevel,
    pub thresholds: Thresholds,
    pub weights: Weights,
    pub critical_patterns: Vec<PatternRule>,
    pub warning_patterns: Vec<PatternRule>,
    pub agent_specific_flags: BTreeMap<String, Value>,
    pub cache_ttl: Duration,
}

impl AgentValidationConfig {
    /// The validator's default config including its built-in rules.
    pub fn builtin(kind: ValidatorKind) -> Result<Self, ConfigError> {
        let mut config = Self::bare(kind);
        for rule in kind.builtin_rules()? {
            config = config.with_rule(rule);
        }
        Ok(config)
    }

    /// The validator's default thresholds and flags without any rules.
    pub fn bare(kind: ValidatorKind) -> Self {
        let (validation_level, confidence, hallucination) = kind.defaults();

        let mut agent_specific_flags = BTreeMap::new();
        if kind == ValidatorKind::Chef {
            agent_specific_flags.insert(FLAG_ALLOW_ADDITIONAL_INGREDIENTS.to_string(), Value::Bool(false));
            agent_specific_flags.insert(FLAG_MAX_ADDITIONAL_INGREDIENTS.to_string(), Value::from(2u64));
        }

        Self {
            validator: kind,
            validation_level,
            thresholds: Thresholds {
                confidence,
                hallucination,
            },
            weights: Weights::default(),
            critical_patterns: Vec::new(),
            warning_patterns: Vec::new(),
            agent_specific_flags,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn with_thresholds(mut self, confidence: f64, hallucination: f64) -> Self {
        self.thresholds = Thresholds {
            confidence,
            hallucination,
        };
        self
    }

    pub fn with_weights(mut self, critical: f64, warning: f64) -> Self {
        self.weights = Weights { critical, warning };
        self
    }

    /// Add a rule to the list matching its severity.
    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        match rule.severity() {
            Severity::Critical => self.critical_patterns.push(rule),
            Severity::Warning => self.warning_patterns.push(rule),
        }
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.agent_specific_flags.insert(key.into(), value.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Rules that run at `level`, critical first.
    pub fn rules_at(&self, level: ValidationLevel) -> impl Iterator<Item = &PatternRule> + '_ {
        self.critical_patterns
            .iter()
            .chain(self.warning_patterns.iter())
            .filter(move |rule| rule.applies_at(level))
    }

    pub fn flag_bool(&self, key: &str) -> Option<bool> {
        self.agent_specific_flags.get(key).and_then(Value::as_bool)
    }

    pub fn flag_u64(&self, key: &str) -> Option<u64> {
        self.agent_specific_flags.get(key).and_then(Value::as_u64)
    }

    /// Check value ranges and rule placement.
    pub fn validate(&self, agent_type: &str) -> Result<(), ConfigError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.thresholds.confidence) {
            return Err(ConfigError::invalid(
                agent_type,
                format!("confidence_threshold {} is outside [0, 1]", self.thresholds.confidence),
            ));
        }
        if !unit.contains(&self.thresholds.hallucination) {
            return Err(ConfigError::invalid(
                agent_type,
                format!("hallucination_threshold {} is outside [0, 1]", self.thresholds.hallucination),
            ));
        }

        for (name, weight) in [("critical_weight", self.weights.critical), ("warning_weight", self.weights.warning)] {
            if !(weight > 0.0 && weight <= 1.0) {
                return Err(ConfigError::invalid(
                    agent_type,
                    format!("{} {} is outside (0, 1]", name, weight),
                ));
            }
        }

        let misplaced = self
            .critical_patterns
            .iter()
            .find(|rule| rule.severity() != Severity::Critical)
            .or_else(|| {
                self.warning_patterns
                    .iter()
                    .find(|rule| rule.severity() != Severity::Warning)
            });
        if let Some(rule) = misplaced {
            return Err(ConfigError::invalid(
                agent_type,
                format!("rule '{}' is listed under the wrong severity", rule.name()),
            ));
        }

        let mut seen = HashSet::new();
        for rule in self.critical_patterns.iter().chain(self.warning_patterns.iter()) {
            if !seen.insert(rule.name()) {
                return Err(ConfigError::invalid(
                    agent_type,
                    format!("duplicate rule name '{}'", rule.name()),
                ));
            }
        }

        if let Some(value) = self.agent_specific_flags.get(FLAG_ALLOW_ADDITIONAL_INGREDIENTS) {
            if !value.is_boolean() {
                return Err(ConfigError::invalid(
                    agent_type,
                    format!("{} must be a boolean", FLAG_ALLOW_ADDITIONAL_INGREDIENTS),
                ));
            }
        }
        if let Some(value) = self.agent_specific_flags.get(FLAG_MAX_ADDITIONAL_INGREDIENTS) {
            if !value.is_u64() {
                return Err(ConfigError::invalid(
                    agent_type,
                    format!("{} must be a non-negative integer", FLAG_MAX_ADDITIONAL_INGREDIENTS),
                ));
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// An agent entry as written in a configuration file.
///
/// Every field except `validator` is an override of the validator's
/// defaults. With `extends_builtin: false` the built-in rules are dropped
/// and only the listed patterns run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfigSpec {
    pub validator: ValidatorKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_level: Option<ValidationLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucination_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_weight: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_weight: Option<f64>,

    #[serde(default = "default_true")]
    pub extends_builtin: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical_patterns: Vec<PatternSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warning_patterns: Vec<PatternSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_specific_flags: BTreeMap<String, Value>,

    #[serde(default, with = "super::duration::option", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<Duration>,
}

impl AgentConfigSpec {
    pub fn new(validator: ValidatorKind) -> Self {
        Self {
            validator,
            validation_level: None,
            confidence_threshold: None,
            hallucination_threshold: None,
            critical_weight: None,
            warning_weight: None,
            extends_builtin: true,
            critical_patterns: Vec::new(),
            warning_patterns: Vec::new(),
            agent_specific_flags: BTreeMap::new(),
            cache_ttl: None,
        }
    }

    /// Compile patterns, apply overrides and validate.
    pub fn compile(&self, agent_type: &str) -> Result<AgentValidationConfig, ConfigError> {
        let mut config = if self.extends_builtin {
            AgentValidationConfig::builtin(self.validator)?
        } else {
            AgentValidationConfig::bare(self.validator)
        };

        if let Some(level) = self.validation_level {
            config.validation_level = level;
        }
        if let Some(confidence) = self.confidence_threshold {
            config.thresholds.confidence = confidence;
        }
        if let Some(hallucination) = self.hallucination_threshold {
            config.thresholds.hallucination = hallucination;
        }
        if let Some(weight) = self.critical_weight {
            config.weights.critical = weight;
        }
        if let Some(weight) = self.warning_weight {
            config.weights.warning = weight;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = ttl;
        }

        for spec in &self.critical_patterns {
            config.critical_patterns.push(PatternRule::from_spec(spec, Severity::Critical)?);
        }
        for spec in &self.warning_patterns {
            config.warning_patterns.push(PatternRule::from_spec(spec, Severity::Warning)?);
        }

        config
            .agent_specific_flags
            .extend(self.agent_specific_flags.iter().map(|(k, v)| (k.clone(), v.clone())));

        config.validate(agent_type)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternError;
    use crate::types::HallucinationType;

    #[test]
    fn test_builtin_defaults() {
        let chef = AgentValidationConfig::builtin(ValidatorKind::Chef).unwrap();
        assert_eq!(chef.validation_level, ValidationLevel::Strict);
        assert_eq!(chef.thresholds.confidence, 0.8);
        assert_eq!(chef.thresholds.hallucination, 0.2);
        assert_eq!(chef.flag_bool(FLAG_ALLOW_ADDITIONAL_INGREDIENTS), Some(false));
        assert_eq!(chef.flag_u64(FLAG_MAX_ADDITIONAL_INGREDIENTS), Some(2));
        assert_eq!(chef.cache_ttl, DEFAULT_CACHE_TTL);

        let weather = AgentValidationConfig::builtin(ValidatorKind::Weather).unwrap();
        assert_eq!(weather.validation_level, ValidationLevel::Lenient);
        assert!(weather.agent_specific_flags.is_empty());

        for kind in ValidatorKind::ALL {
            AgentValidationConfig::builtin(kind)
                .unwrap()
                .validate(kind.as_str())
                .unwrap();
        }
    }

    #[test]
    fn test_rules_at_filters_by_level() {
        let chef = AgentValidationConfig::builtin(ValidatorKind::Chef).unwrap();
        let lenient: Vec<&str> = chef.rules_at(ValidationLevel::Lenient).map(|r| r.name()).collect();
        let standard: Vec<&str> = chef.rules_at(ValidationLevel::Standard).map(|r| r.name()).collect();

        assert!(lenient.contains(&"cooking_time"));
        assert!(!lenient.contains(&"resting_hours"));
        assert!(standard.contains(&"resting_hours"));
    }

    #[test]
    fn test_threshold_out_of_range_is_invalid() {
        let config = AgentValidationConfig::bare(ValidatorKind::Generic).with_thresholds(1.2, 0.3);
        assert!(matches!(config.validate("generic"), Err(ConfigError::Invalid { .. })));

        let config = AgentValidationConfig::bare(ValidatorKind::Generic).with_thresholds(0.7, f64::NAN);
        assert!(config.validate("generic").is_err());
    }

    #[test]
    fn test_zero_weight_is_invalid() {
        let config = AgentValidationConfig::bare(ValidatorKind::Generic).with_weights(0.0, 0.1);
        assert!(config.validate("generic").is_err());
    }

    #[test]
    fn test_misplaced_rule_is_invalid() {
        let mut config = AgentValidationConfig::bare(ValidatorKind::Generic);
        config.critical_patterns.push(
            PatternRule::warning("soft", HallucinationType::FactualError, "x").unwrap(),
        );
        assert!(config.validate("generic").is_err());
    }

    #[test]
    fn test_mistyped_chef_flag_is_invalid() {
        let config = AgentValidationConfig::bare(ValidatorKind::Chef)
            .with_flag(FLAG_MAX_ADDITIONAL_INGREDIENTS, "two");
        assert!(config.validate("chef").is_err());
    }

    #[test]
    fn test_spec_overrides_and_extends() {
        let mut spec = AgentConfigSpec::new(ValidatorKind::Chef);
        spec.hallucination_threshold = Some(0.5);
        spec.cache_ttl = Some(Duration::from_secs(60));
        spec.agent_specific_flags
            .insert(FLAG_ALLOW_ADDITIONAL_INGREDIENTS.to_string(), Value::Bool(true));
        spec.warning_patterns.push(PatternSpec {
            name: "portion_count".to_string(),
            hallucination_type: HallucinationType::FactualError,
            regex: r"(\d+)\s*porcj".to_string(),
            range: Some(crate::patterns::RangeSpec { min: 1.0, max: 20.0 }),
            min_level: None,
        });

        let config = spec.compile("pastry_chef").unwrap();
        assert_eq!(config.thresholds.hallucination, 0.5);
        assert_eq!(config.thresholds.confidence, 0.8);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.flag_bool(FLAG_ALLOW_ADDITIONAL_INGREDIENTS), Some(true));
        assert_eq!(config.flag_u64(FLAG_MAX_ADDITIONAL_INGREDIENTS), Some(2));
        assert!(config.warning_patterns.iter().any(|r| r.name() == "portion_count"));
        assert!(config.critical_patterns.iter().any(|r| r.name() == "cooking_time"));
    }

    #[test]
    fn test_spec_without_builtin_rules() {
        let mut spec = AgentConfigSpec::new(ValidatorKind::Chef);
        spec.extends_builtin = false;

        let config = spec.compile("minimal_chef").unwrap();
        assert!(config.critical_patterns.is_empty());
        assert!(config.warning_patterns.is_empty());
    }

    #[test]
    fn test_spec_with_broken_regex() {
        let mut spec = AgentConfigSpec::new(ValidatorKind::Generic);
        spec.critical_patterns.push(PatternSpec {
            name: "broken".to_string(),
            hallucination_type: HallucinationType::FactualError,
            regex: "([a-z".to_string(),
            range: None,
            min_level: None,
        });

        assert!(matches!(
            spec.compile("generic"),
            Err(ConfigError::Pattern(PatternError::Compile { .. }))
        ));
    }
}
