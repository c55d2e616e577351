//! Validator contract and the built-in specialized validators.
//!
//! A validator contributes two kinds of checks:
//!
//! - **Pattern checks**: the agent's configured [`PatternRule`]s, grouped by
//!   hallucination type. These are the same for every validator and need no
//!   code beyond the configuration.
//! - **Semantic checks**: domain logic that cannot be expressed as a single
//!   regex (receipt arithmetic, ingredient grounding, citation coverage).
//!
//! [`Validator::plan`] lists the checks that run at a level, and each check is
//! independent, so the runtime can execute them concurrently.

mod chef;
mod generic;
mod receipt;
mod search;
mod weather;

pub use chef::ChefValidator;
pub use generic::GenericValidator;
pub use receipt::ReceiptValidator;
pub use search::SearchValidator;
pub use weather::WeatherValidator;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::AgentValidationConfig;
use crate::patterns::{PatternError, PatternRule};
use crate::scoring::Scorer;
use crate::types::{HallucinationType, PatternMatch, ValidationInput, ValidationLevel, ValidationResult};

/// Errors raised while executing a check.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidatorError {
    #[error("Invalid hint '{key}': expected {expected}, found {found}")]
    InvalidHint {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("Validator failed: {0}")]
    Internal(String),
}

impl ValidatorError {
    /// True when the request itself was malformed, not the validator.
    pub fn is_input_error(&self) -> bool {
        matches!(self, ValidatorError::InvalidHint { .. })
    }

    pub fn invalid_hint(key: &str, expected: &'static str, found: &Value) -> Self {
        let found = match found {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        ValidatorError::InvalidHint {
            key: key.to_string(),
            expected,
            found: found.to_string(),
        }
    }
}

/// Built-in validator implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    Chef,
    Receipt,
    Weather,
    Search,
    Generic,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 5] = [
        ValidatorKind::Chef,
        ValidatorKind::Receipt,
        ValidatorKind::Weather,
        ValidatorKind::Search,
        ValidatorKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorKind::Chef => "chef",
            ValidatorKind::Receipt => "receipt",
            ValidatorKind::Weather => "weather",
            ValidatorKind::Search => "search",
            ValidatorKind::Generic => "generic",
        }
    }

    pub fn validator(&self) -> Arc<dyn Validator> {
        match self {
            ValidatorKind::Chef => Arc::new(ChefValidator),
            ValidatorKind::Receipt => Arc::new(ReceiptValidator),
            ValidatorKind::Weather => Arc::new(WeatherValidator),
            ValidatorKind::Search => Arc::new(SearchValidator),
            ValidatorKind::Generic => Arc::new(GenericValidator),
        }
    }

    /// The validator's built-in pattern rules, critical and warning mixed.
    pub fn builtin_rules(&self) -> Result<Vec<PatternRule>, PatternError> {
        match self {
            ValidatorKind::Chef => chef::builtin_rules(),
            ValidatorKind::Receipt => receipt::builtin_rules(),
            ValidatorKind::Weather => weather::builtin_rules(),
            ValidatorKind::Search => search::builtin_rules(),
            ValidatorKind::Generic => generic::builtin_rules(),
        }
    }

    /// Default `(level, confidence_threshold, hallucination_threshold)`.
    pub fn defaults(&self) -> (ValidationLevel, f64, f64) {
        match self {
            ValidatorKind::Chef => (ValidationLevel::Strict, 0.8, 0.2),
            ValidatorKind::Receipt => (ValidationLevel::Strict, 0.9, 0.1),
            ValidatorKind::Weather => (ValidationLevel::Lenient, 0.6, 0.4),
            ValidatorKind::Search => (ValidationLevel::Standard, 0.7, 0.3),
            ValidatorKind::Generic => (ValidationLevel::Standard, 0.7, 0.3),
        }
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ValidatorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown validator: {}", s))
    }
}

/// Domain checks that go beyond a single regex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticCheck {
    IngredientGrounding,
    IngredientQuantities,
    ReceiptTotal,
    PriceGrounding,
    DateGrounding,
    CitationCoverage,
    CitationGrounding,
    Contradictions,

    /// A check provided by a custom validator.
    Custom {
        name: &'static str,
        min_level: ValidationLevel,
    },
}

impl SemanticCheck {
    pub fn name(&self) -> &'static str {
        match self {
            SemanticCheck::IngredientGrounding => "ingredient_grounding",
            SemanticCheck::IngredientQuantities => "ingredient_quantities",
            SemanticCheck::ReceiptTotal => "receipt_total",
            SemanticCheck::PriceGrounding => "price_grounding",
            SemanticCheck::DateGrounding => "date_grounding",
            SemanticCheck::CitationCoverage => "citation_coverage",
            SemanticCheck::CitationGrounding => "citation_grounding",
            SemanticCheck::Contradictions => "contradictions",
            SemanticCheck::Custom { name, .. } => name,
        }
    }

    /// Least strict level at which the check runs.
    pub fn min_level(&self) -> ValidationLevel {
        match self {
            SemanticCheck::IngredientQuantities
            | SemanticCheck::PriceGrounding
            | SemanticCheck::DateGrounding => ValidationLevel::Strict,
            SemanticCheck::CitationCoverage => ValidationLevel::Standard,
            SemanticCheck::IngredientGrounding
            | SemanticCheck::ReceiptTotal
            | SemanticCheck::CitationGrounding
            | SemanticCheck::Contradictions => ValidationLevel::Lenient,
            SemanticCheck::Custom { min_level, .. } => *min_level,
        }
    }
}

/// One independently executable unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// All configured rules of one hallucination type
    Patterns(HallucinationType),

    Semantic(SemanticCheck),
}

impl Check {
    pub fn name(&self) -> String {
        match self {
            Check::Patterns(t) => format!("patterns:{}", t.as_str().to_ascii_lowercase()),
            Check::Semantic(check) => check.name().to_string(),
        }
    }
}

/// The validator contract.
///
/// Implementors provide a name and, optionally, semantic checks. Planning,
/// pattern scanning and sequential validation are provided.
pub trait Validator: Send + Sync {
    /// Reported as `validator_used`.
    fn name(&self) -> &'static str;

    fn semantic_checks(&self) -> &[SemanticCheck] {
        &[]
    }

    fn run_semantic(
        &self,
        check: SemanticCheck,
        input: &ValidationInput,
        config: &AgentValidationConfig,
    ) -> Result<Vec<PatternMatch>, ValidatorError> {
        let _ = (check, input, config);
        Ok(Vec::new())
    }

    /// Checks that run at `level`: one pattern check per hallucination type
    /// present among the level's rules, then the applicable semantic checks.
    fn plan(&self, config: &AgentValidationConfig, level: ValidationLevel) -> Vec<Check> {
        let types: BTreeSet<HallucinationType> = config
            .rules_at(level)
            .map(|rule| rule.hallucination_type())
            .collect();

        let mut checks: Vec<Check> = types.into_iter().map(Check::Patterns).collect();
        checks.extend(
            self.semantic_checks()
                .iter()
                .filter(|check| level >= check.min_level())
                .map(|check| Check::Semantic(*check)),
        );
        checks
    }

    fn run_check(
        &self,
        check: Check,
        input: &ValidationInput,
        config: &AgentValidationConfig,
        level: ValidationLevel,
    ) -> Result<Vec<PatternMatch>, ValidatorError> {
        match check {
            Check::Patterns(hallucination_type) => Ok(config
                .rules_at(level)
                .filter(|rule| rule.hallucination_type() == hallucination_type)
                .flat_map(|rule| rule.scan(&input.response))
                .collect()),
            Check::Semantic(semantic) => self.run_semantic(semantic, input, config),
        }
    }

    /// Run every planned check in order and score the result.
    fn validate(
        &self,
        input: &ValidationInput,
        config: &AgentValidationConfig,
        level: ValidationLevel,
    ) -> Result<ValidationResult, ValidatorError> {
        let started = Instant::now();
        let mut matches = Vec::new();
        for check in self.plan(config, level) {
            matches.extend(self.run_check(check, input, config, level)?);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(Scorer::new(config, level).score(self.name(), matches, Vec::new(), elapsed_ms))
    }
}
