//! Pattern rules and shared extraction patterns.
//!
//! A [`PatternRule`] couples a compiled regex with the hallucination type and
//! severity it reports, plus an optional [`ValueCheck`] that decides whether a
//! regex match is actually implausible (e.g. "900 minut" against a 0..300
//! cooking-time range). Rules are compiled once when agent configs are built;
//! a malformed pattern is a [`PatternError`] and aborts startup.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::{parse_decimal, parse_grosze};
use crate::types::{HallucinationType, PatternMatch, Severity, ValidationLevel};

lazy_static! {
    /// Price token with currency ("8.49 zł", "12,00 PLN")
    pub static ref PRICE_PATTERN: Regex = Regex::new(
        r"(?i)(\d+[,.]\d{2})\s*(?:zł|pln)\b"
    ).unwrap();

    /// Bare two-decimal amount, as found on OCR'd receipts
    pub static ref AMOUNT_PATTERN: Regex = Regex::new(
        r"\b(\d+[,.]\d{2})\b"
    ).unwrap();

    /// Day.month.year date
    pub static ref DATE_PATTERN: Regex = Regex::new(
        r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b"
    ).unwrap();

    /// http(s) or www URL
    pub static ref URL_PATTERN: Regex = Regex::new(
        r#"(?i)\b(?:https?://|www\.)[^\s<>"')\]]+"#
    ).unwrap();
}

/// Errors raised while compiling pattern rules.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Invalid regex for pattern '{name}': {source}")]
    Compile {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid range for pattern '{name}': min {min} is greater than max {max}")]
    InvalidRange { name: String, min: f64, max: f64 },
}

/// Decides whether a regex match carries a plausible value.
#[derive(Debug, Clone, Copy)]
pub enum ValueCheck {
    /// Capture group 1 parsed as a decimal must lie within `min..=max`
    Range { min: f64, max: f64 },

    /// Arbitrary structural check over the captures (calendar dates, checksums)
    Plausible(fn(&Captures<'_>) -> bool),
}

impl ValueCheck {
    /// True when the captured value is plausible. Values that cannot be
    /// parsed are given the benefit of the doubt.
    pub fn accepts(&self, caps: &Captures<'_>) -> bool {
        match self {
            ValueCheck::Range { min, max } => caps
                .get(1)
                .and_then(|m| parse_decimal(m.as_str()))
                .map(|value| value >= *min && value <= *max)
                .unwrap_or(true),
            ValueCheck::Plausible(check) => check(caps),
        }
    }
}

/// A compiled detection rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    name: String,
    hallucination_type: HallucinationType,
    severity: Severity,
    regex: Regex,
    value_check: Option<ValueCheck>,
    min_level: ValidationLevel,
}

impl PatternRule {
    /// Compile a rule. The minimum level defaults from the severity.
    pub fn new(
        name: impl Into<String>,
        hallucination_type: HallucinationType,
        severity: Severity,
        pattern: &str,
    ) -> Result<Self, PatternError> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|source| PatternError::Compile {
            name: name.clone(),
            source,
        })?;

        Ok(Self {
            name,
            hallucination_type,
            severity,
            regex,
            value_check: None,
            min_level: severity.default_min_level(),
        })
    }

    pub fn critical(
        name: impl Into<String>,
        hallucination_type: HallucinationType,
        pattern: &str,
    ) -> Result<Self, PatternError> {
        Self::new(name, hallucination_type, Severity::Critical, pattern)
    }

    pub fn warning(
        name: impl Into<String>,
        hallucination_type: HallucinationType,
        pattern: &str,
    ) -> Result<Self, PatternError> {
        Self::new(name, hallucination_type, Severity::Warning, pattern)
    }

    /// Only report matches whose first capture falls outside `min..=max`.
    pub fn with_range(mut self, min: f64, max: f64) -> Result<Self, PatternError> {
        if min > max || min.is_nan() || max.is_nan() {
            return Err(PatternError::InvalidRange {
                name: self.name,
                min,
                max,
            });
        }
        self.value_check = Some(ValueCheck::Range { min, max });
        Ok(self)
    }

    /// Only report matches the check rejects.
    pub fn with_check(mut self, check: fn(&Captures<'_>) -> bool) -> Self {
        self.value_check = Some(ValueCheck::Plausible(check));
        self
    }

    pub fn with_min_level(mut self, level: ValidationLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Compile a rule described in configuration.
    pub fn from_spec(spec: &PatternSpec, severity: Severity) -> Result<Self, PatternError> {
        let mut rule = Self::new(&spec.name, spec.hallucination_type, severity, &spec.regex)?;
        if let Some(range) = &spec.range {
            rule = rule.with_range(range.min, range.max)?;
        }
        if let Some(level) = spec.min_level {
            rule = rule.with_min_level(level);
        }
        Ok(rule)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hallucination_type(&self) -> HallucinationType {
        self.hallucination_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn min_level(&self) -> ValidationLevel {
        self.min_level
    }

    pub fn applies_at(&self, level: ValidationLevel) -> bool {
        level >= self.min_level
    }

    /// Every implausible match of this rule in `text`.
    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.regex
            .captures_iter(text)
            .filter(|caps| match &self.value_check {
                Some(check) => !check.accepts(caps),
                None => true,
            })
            .filter_map(|caps| caps.get(0))
            .map(|m| {
                PatternMatch::new(
                    &self.name,
                    self.hallucination_type,
                    self.severity,
                    m.as_str(),
                    m.start(),
                    m.end(),
                )
            })
            .collect()
    }
}

/// Numeric bounds for a configured rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
}

/// A rule as written in a configuration file; severity comes from the list
/// (`critical_patterns` or `warning_patterns`) it appears in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub hallucination_type: HallucinationType,

    pub regex: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<ValidationLevel>,
}

/// A price token found in text, in grosze, with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceToken {
    pub grosze: i64,
    pub start: usize,
    pub end: usize,
}

/// All currency-marked prices in `text`.
pub fn find_prices(text: &str) -> Vec<PriceToken> {
    PRICE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let grosze = parse_grosze(caps.get(1)?.as_str())?;
            Some(PriceToken {
                grosze,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// `(day, month, year)` from captures laid out like [`DATE_PATTERN`].
pub fn date_from_captures(caps: &Captures<'_>) -> Option<(u32, u32, i32)> {
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let year = caps.get(3)?.as_str().parse().ok()?;
    Some((day, month, year))
}

/// Dates in `text` normalized to `(day, month, year)` with their spans.
pub fn find_dates(text: &str) -> Vec<((u32, u32, i32), usize, usize)> {
    DATE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((date_from_captures(&caps)?, whole.start(), whole.end()))
        })
        .collect()
}

/// Lowercased host of a URL without scheme or `www.`.
pub fn url_host(url: &str) -> String {
    let lower = url.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches(['.', ',', ';', ':'])
        .to_string()
}
