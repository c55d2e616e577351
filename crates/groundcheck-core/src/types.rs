//! Core data types shared by validators, the scorer and the runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::validators::ValidatorError;

/// Strictness profile selecting which rules run and how thresholds apply.
///
/// Variants are ordered from most lenient to strictest, so
/// `level >= rule.min_level()` decides whether a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    Lenient,
    Standard,
    Strict,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Lenient => "LENIENT",
            ValidationLevel::Standard => "STANDARD",
            ValidationLevel::Strict => "STRICT",
        }
    }

    /// Number of steps from `other` to `self`; positive when `self` is stricter.
    pub fn steps_from(&self, other: ValidationLevel) -> i32 {
        *self as i32 - other as i32
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LENIENT" => Ok(ValidationLevel::Lenient),
            "STANDARD" => Ok(ValidationLevel::Standard),
            "STRICT" => Ok(ValidationLevel::Strict),
            other => Err(format!("unknown validation level: {}", other)),
        }
    }
}

/// Category of fabricated content a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HallucinationType {
    PriceHallucination,
    DateTimeHallucination,
    FactualError,
    IngredientHallucination,
    WeatherHallucination,
    SearchHallucination,
}

impl HallucinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HallucinationType::PriceHallucination => "PRICE_HALLUCINATION",
            HallucinationType::DateTimeHallucination => "DATE_TIME_HALLUCINATION",
            HallucinationType::FactualError => "FACTUAL_ERROR",
            HallucinationType::IngredientHallucination => "INGREDIENT_HALLUCINATION",
            HallucinationType::WeatherHallucination => "WEATHER_HALLUCINATION",
            HallucinationType::SearchHallucination => "SEARCH_HALLUCINATION",
        }
    }
}

impl fmt::Display for HallucinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strongly a match indicates hallucination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

impl Severity {
    /// Least strict level at which rules of this severity run by default.
    pub fn default_min_level(&self) -> ValidationLevel {
        match self {
            Severity::Critical => ValidationLevel::Lenient,
            Severity::Warning => ValidationLevel::Standard,
        }
    }
}

/// Final verdict for a validated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Accept,
    Warn,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Accept => "ACCEPT",
            Recommendation::Warn => "WARN",
            Recommendation::Reject => "REJECT",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detection: which rule fired, on what text, and where.
///
/// `span` holds byte offsets into the validated response. An empty span
/// `(0, 0)` marks a finding with no anchor in the response, such as a
/// receipt total claimed only through a hint; `matched_text` then describes
/// the claim instead of quoting the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub rule: String,
    pub hallucination_type: HallucinationType,
    pub severity: Severity,
    pub matched_text: String,
    pub span: (usize, usize),
}

impl PatternMatch {
    pub fn new(
        rule: impl Into<String>,
        hallucination_type: HallucinationType,
        severity: Severity,
        matched_text: impl Into<String>,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            rule: rule.into(),
            hallucination_type,
            severity,
            matched_text: matched_text.into(),
            span: (start, end),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// False for findings that do not point into the response text.
    pub fn is_anchored(&self) -> bool {
        self.span.0 < self.span.1
    }
}

/// Structured verdict for one validation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// 1 - hallucination_score, minus timeout penalties, floored at 0
    pub confidence: f64,

    /// Weighted match count, capped at 1
    pub hallucination_score: f64,

    /// Matches sorted by span, then rule name
    pub matched_patterns: Vec<PatternMatch>,

    pub recommendation: Recommendation,

    /// Name of the validator that produced this result
    pub validator_used: String,

    /// Wall time spent producing (or looking up) this result
    pub elapsed_ms: f64,

    /// Checks that exceeded their time budget and were treated as non-matches
    #[serde(default)]
    pub timed_out_checks: Vec<String>,
}

impl ValidationResult {
    pub fn is_rejected(&self) -> bool {
        self.recommendation == Recommendation::Reject
    }

    /// Matches of one hallucination type.
    pub fn matches_of(
        &self,
        hallucination_type: HallucinationType,
    ) -> impl Iterator<Item = &PatternMatch> {
        self.matched_patterns
            .iter()
            .filter(move |m| m.hallucination_type == hallucination_type)
    }

    pub fn count_of(&self, hallucination_type: HallucinationType) -> usize {
        self.matches_of(hallucination_type).count()
    }
}

/// Validator-specific inputs supplied by the agent (e.g. `available_ingredients`).
///
/// Backed by a `BTreeMap` so iteration and serialization order are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hints(BTreeMap<String, Value>);

impl Hints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// A list of strings. Also accepts a single comma-separated string.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, ValidatorError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(ValidatorError::invalid_hint(key, "list of strings", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(ValidatorError::invalid_hint(key, "list of strings", other)),
        }
    }

    /// A number. Strings holding a decimal (dot or comma) are accepted.
    pub fn number(&self, key: &str) -> Result<Option<f64>, ValidatorError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => crate::text::parse_decimal(s)
                .map(Some)
                .ok_or_else(|| ValidatorError::invalid_hint(key, "number", &Value::String(s.clone()))),
            Some(other) => Err(ValidatorError::invalid_hint(key, "number", other)),
        }
    }

    pub fn flag(&self, key: &str) -> Result<Option<bool>, ValidatorError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(ValidatorError::invalid_hint(key, "boolean", other)),
        }
    }

    /// Canonical serialized form, used for cache keys.
    pub fn digest(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Hints {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything a validator looks at for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationInput {
    pub agent_type: String,
    pub response: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub hints: Hints,
}

impl ValidationInput {
    pub fn new(agent_type: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(key, value);
        self
    }
}
