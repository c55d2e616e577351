//! Fallback validation for agents without a dedicated validator.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashSet;

use super::{SemanticCheck, Validator, ValidatorError};
use crate::config::AgentValidationConfig;
use crate::patterns::{date_from_captures, PatternError, PatternRule, DATE_PATTERN};
use crate::text::is_calendar_date;
use crate::types::{HallucinationType, PatternMatch, Severity, ValidationInput};

lazy_static! {
    static ref AFFIRMED_PATTERN: Regex = Regex::new(
        r"(?i)\b(\p{L}+)\s+(jest|są|ma|mają|is|are|has|have)\s+(\p{L}+)"
    ).unwrap();

    static ref NEGATED_PATTERN: Regex = Regex::new(
        r"(?i)\b(\p{L}+)\s+(nie\s+jest|nie\s+są|nie\s+ma|nie\s+mają|is\s+not|isn't|are\s+not|aren't|has\s+no|does\s+not\s+have|do\s+not\s+have)\s+(\p{L}+)"
    ).unwrap();

    /// Captured as subject or object only when a negation was split apart
    static ref NEGATION_WORDS: Vec<&'static str> = vec!["nie", "not", "no"];
}

fn plausible_clock(caps: &Captures<'_>) -> bool {
    let hours: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
    let minutes: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    match (hours, minutes) {
        (Some(h), Some(m)) => (h < 24 && m < 60) || (h == 24 && m == 0),
        _ => true,
    }
}

fn plausible_date(caps: &Captures<'_>) -> bool {
    match date_from_captures(caps) {
        Some((day, month, year)) => is_calendar_date(day, month, year, 1..=9999),
        None => true,
    }
}

pub(super) fn builtin_rules() -> Result<Vec<PatternRule>, PatternError> {
    Ok(vec![
        PatternRule::warning("long_number", HallucinationType::FactualError, r"\b\d{16,}\b")?,
        PatternRule::warning(
            "clock_time",
            HallucinationType::DateTimeHallucination,
            r"\b(\d{1,2}):(\d{2})\b",
        )?
        .with_check(plausible_clock),
        PatternRule::warning(
            "calendar_date",
            HallucinationType::DateTimeHallucination,
            DATE_PATTERN.as_str(),
        )?
        .with_check(plausible_date),
    ])
}

/// Base form of a copula so "nie jest" pairs with "jest".
fn base_verb(verb: &str) -> String {
    let verb = verb.to_lowercase();
    let verb: Vec<&str> = verb.split_whitespace().collect();
    let base = match verb.as_slice() {
        ["nie", rest] => *rest,
        ["is", "not"] | ["isn't"] => "is",
        ["are", "not"] | ["aren't"] => "are",
        ["has", "no"] | ["does", "not", "have"] => "has",
        ["do", "not", "have"] => "have",
        [single] => *single,
        _ => "",
    };
    base.to_string()
}

type Statement = (String, String, String);

fn statement(caps: &Captures<'_>) -> Option<Statement> {
    let subject = caps.get(1)?.as_str().to_lowercase();
    let object = caps.get(3)?.as_str().to_lowercase();
    if NEGATION_WORDS.contains(&subject.as_str()) || NEGATION_WORDS.contains(&object.as_str()) {
        return None;
    }
    Some((subject, base_verb(caps.get(2)?.as_str()), object))
}

const CHECKS: &[SemanticCheck] = &[SemanticCheck::Contradictions];

/// Applies agent-agnostic plausibility rules.
pub struct GenericValidator;

impl GenericValidator {
    /// A negated statement whose positive form also appears in the response.
    fn contradictions(&self, input: &ValidationInput) -> Vec<PatternMatch> {
        let affirmed: HashSet<Statement> = AFFIRMED_PATTERN
            .captures_iter(&input.response)
            .filter_map(|caps| statement(&caps))
            .collect();
        if affirmed.is_empty() {
            return Vec::new();
        }

        NEGATED_PATTERN
            .captures_iter(&input.response)
            .filter(|caps| statement(caps).map(|s| affirmed.contains(&s)).unwrap_or(false))
            .filter_map(|caps| caps.get(0))
            .map(|m| {
                PatternMatch::new(
                    "contradiction",
                    HallucinationType::FactualError,
                    Severity::Critical,
                    m.as_str(),
                    m.start(),
                    m.end(),
                )
            })
            .collect()
    }
}

impl Validator for GenericValidator {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn semantic_checks(&self) -> &[SemanticCheck] {
        CHECKS
    }

    fn run_semantic(
        &self,
        check: SemanticCheck,
        input: &ValidationInput,
        _config: &AgentValidationConfig,
    ) -> Result<Vec<PatternMatch>, ValidatorError> {
        Ok(match check {
            SemanticCheck::Contradictions => self.contradictions(input),
            _ => Vec::new(),
        })
    }
}
