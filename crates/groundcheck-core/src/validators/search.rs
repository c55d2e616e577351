//! Search answer validation: facts need citations, citations need sources.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

use super::{SemanticCheck, Validator, ValidatorError};
use crate::config::AgentValidationConfig;
use crate::patterns::{url_host, PatternError, PatternRule, URL_PATTERN};
use crate::text::sentences;
use crate::types::{HallucinationType, PatternMatch, Severity, ValidationInput};

lazy_static! {
    /// "źródło: https://..." style citation, URL in group 1
    static ref CITATION_PATTERN: Regex = Regex::new(
        r#"(?i)(?:źródło|źródła|source|sources)\s*:\s*((?:https?://|www\.)[^\s<>"')\]]+)"#
    ).unwrap();

    static ref FACT_MARKERS: Vec<&'static str> = vec!["według", "according to"];
}

pub(super) fn builtin_rules() -> Result<Vec<PatternRule>, PatternError> {
    Ok(vec![PatternRule::warning(
        "unverifiable_attribution",
        HallucinationType::SearchHallucination,
        r"(?i)\b(?:według\s+(?:ekspertów|naukowców|badań|specjalistów|źródeł)|badania\s+(?:pokazują|wykazały)|eksperci\s+twierdzą|studies\s+show|experts\s+say|research\s+shows|according\s+to\s+(?:experts|studies|sources))\b",
    )?])
}

fn states_fact(sentence: &str) -> bool {
    if sentence.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = sentence.to_lowercase();
    FACT_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn hosts_match(cited: &str, known: &str) -> bool {
    cited == known
        || cited.ends_with(&format!(".{}", known))
        || known.ends_with(&format!(".{}", cited))
}

const CHECKS: &[SemanticCheck] = &[SemanticCheck::CitationCoverage, SemanticCheck::CitationGrounding];

/// Validates answers synthesized from search results.
pub struct SearchValidator;

impl SearchValidator {
    fn citation_coverage(&self, input: &ValidationInput) -> Vec<PatternMatch> {
        let parts = sentences(&input.response);
        let cited: Vec<bool> = parts
            .iter()
            .map(|(_, sentence)| CITATION_PATTERN.is_match(sentence))
            .collect();

        parts
            .iter()
            .enumerate()
            .filter(|(i, (_, sentence))| {
                let covered = cited[*i] || cited.get(i + 1).copied().unwrap_or(false);
                !covered && states_fact(sentence)
            })
            .map(|(_, (offset, sentence))| {
                PatternMatch::new(
                    "citation_coverage",
                    HallucinationType::SearchHallucination,
                    Severity::Warning,
                    *sentence,
                    *offset,
                    offset + sentence.len(),
                )
            })
            .collect()
    }

    fn citation_grounding(&self, input: &ValidationInput) -> Vec<PatternMatch> {
        let known: BTreeSet<String> = URL_PATTERN
            .find_iter(&input.context)
            .map(|m| url_host(m.as_str()))
            .filter(|host| !host.is_empty())
            .collect();
        if known.is_empty() {
            return Vec::new();
        }

        CITATION_PATTERN
            .captures_iter(&input.response)
            .filter_map(|caps| caps.get(1))
            .filter(|url| {
                let host = url_host(url.as_str());
                !known.iter().any(|k| hosts_match(&host, k))
            })
            .map(|url| {
                PatternMatch::new(
                    "citation_grounding",
                    HallucinationType::SearchHallucination,
                    Severity::Critical,
                    url.as_str(),
                    url.start(),
                    url.end(),
                )
            })
            .collect()
    }
}

impl Validator for SearchValidator {
    fn name(&self) -> &'static str {
        "search"
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
            SemanticCheck::CitationCoverage => self.citation_coverage(input),
            SemanticCheck::CitationGrounding => self.citation_grounding(input),
            _ => Vec::new(),
        })
    }
}
