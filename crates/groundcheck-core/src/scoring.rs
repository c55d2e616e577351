//! Aggregation of pattern matches into a scored verdict.
//!
//! ## Scoring
//!
//! ```text
//! hallucination_score = min(1, critical_weight * #critical + warning_weight * #warning)
//! confidence          = max(0, 1 - hallucination_score - 0.05 * #timed_out_checks)
//! ```
//!
//! ## Recommendation (first match wins)
//!
//! 1. `hallucination_score >= hallucination_threshold` → REJECT
//! 2. any match, or `confidence < confidence_threshold` → WARN
//! 3. otherwise → ACCEPT
//!
//! Matches are sorted and deduplicated before scoring, so the verdict does not
//! depend on the order in which checks finished.

use crate::config::AgentValidationConfig;
use crate::types::{PatternMatch, Recommendation, ValidationLevel, ValidationResult};

/// Confidence deducted per check that exceeded its time budget.
pub const TIMEOUT_PENALTY: f64 = 0.05;

/// `validator_used` of the degraded result returned on validator failure.
pub const FALLBACK_VALIDATOR: &str = "fallback-on-error";

/// Hallucination threshold adjusted for a level other than the configured one.
///
/// Each step stricter multiplies the threshold by 0.75, each step more
/// lenient by 1.5. The result is clamped to `[0, 1]`.
pub fn effective_threshold(base: f64, configured: ValidationLevel, requested: ValidationLevel) -> f64 {
    let steps = requested.steps_from(configured);
    let factor = if steps >= 0 {
        0.75_f64.powi(steps)
    } else {
        1.5_f64.powi(-steps)
    };
    (base * factor).clamp(0.0, 1.0)
}

/// Scores matches under one agent config and level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scorer {
    critical_weight: f64,
    warning_weight: f64,
    confidence_threshold: f64,
    hallucination_threshold: f64,
}

impl Scorer {
    pub fn new(config: &AgentValidationConfig, level: ValidationLevel) -> Self {
        Self {
            critical_weight: config.weights.critical,
            warning_weight: config.weights.warning,
            confidence_threshold: config.thresholds.confidence,
            hallucination_threshold: effective_threshold(
                config.thresholds.hallucination,
                config.validation_level,
                level,
            ),
        }
    }

    pub fn hallucination_threshold(&self) -> f64 {
        self.hallucination_threshold
    }

    pub fn hallucination_score(&self, matches: &[PatternMatch]) -> f64 {
        let critical = matches.iter().filter(|m| m.is_critical()).count() as f64;
        let warning = matches.len() as f64 - critical;
        (self.critical_weight * critical + self.warning_weight * warning).min(1.0)
    }

    pub fn confidence(&self, hallucination_score: f64, timed_out_checks: usize) -> f64 {
        (1.0 - hallucination_score - TIMEOUT_PENALTY * timed_out_checks as f64).max(0.0)
    }

    pub fn recommend(&self, hallucination_score: f64, confidence: f64) -> Recommendation {
        if hallucination_score >= self.hallucination_threshold {
            Recommendation::Reject
        } else if hallucination_score > 0.0 || confidence < self.confidence_threshold {
            Recommendation::Warn
        } else {
            Recommendation::Accept
        }
    }

    /// Build the final result from everything the checks produced.
    pub fn score(
        &self,
        validator_used: &str,
        mut matches: Vec<PatternMatch>,
        mut timed_out_checks: Vec<String>,
        elapsed_ms: f64,
    ) -> ValidationResult {
        matches.sort_by(|a, b| {
            a.span
                .cmp(&b.span)
                .then_with(|| a.rule.cmp(&b.rule))
                .then_with(|| a.matched_text.cmp(&b.matched_text))
        });
        matches.dedup();
        timed_out_checks.sort();

        let hallucination_score = self.hallucination_score(&matches);
        let confidence = self.confidence(hallucination_score, timed_out_checks.len());

        ValidationResult {
            confidence,
            hallucination_score,
            recommendation: self.recommend(hallucination_score, confidence),
            matched_patterns: matches,
            validator_used: validator_used.to_string(),
            elapsed_ms,
            timed_out_checks,
        }
    }

    /// Degraded result used when a validator fails.
    pub fn fallback(elapsed_ms: f64) -> ValidationResult {
        ValidationResult {
            confidence: 0.5,
            hallucination_score: 0.0,
            matched_patterns: Vec::new(),
            recommendation: Recommendation::Warn,
            validator_used: FALLBACK_VALIDATOR.to_string(),
            elapsed_ms,
            timed_out_checks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HallucinationType, Severity};
    use crate::validators::ValidatorKind;
    use proptest::prelude::*;

    fn critical(rule: &str, start: usize) -> PatternMatch {
        PatternMatch::new(rule, HallucinationType::FactualError, Severity::Critical, "x", start, start + 1)
    }

    fn warning(rule: &str, start: usize) -> PatternMatch {
        PatternMatch::new(rule, HallucinationType::PriceHallucination, Severity::Warning, "y", start, start + 1)
    }

    fn generic_scorer() -> Scorer {
        let config = AgentValidationConfig::builtin(ValidatorKind::Generic).unwrap();
        Scorer::new(&config, config.validation_level)
    }

    #[test]
    fn test_clean_response_is_accepted() {
        let result = generic_scorer().score("generic", Vec::new(), Vec::new(), 0.1);
        assert_eq!(result.hallucination_score, 0.0);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.recommendation, Recommendation::Accept);
    }

    #[test]
    fn test_single_warning_warns() {
        let result = generic_scorer().score("generic", vec![warning("w", 0)], Vec::new(), 0.1);
        assert!((result.hallucination_score - 0.1).abs() < 1e-9);
        assert_eq!(result.recommendation, Recommendation::Warn);
    }

    #[test]
    fn test_single_critical_reaches_standard_threshold() {
        let result = generic_scorer().score("generic", vec![critical("c", 0)], Vec::new(), 0.1);
        assert!((result.hallucination_score - 0.3).abs() < 1e-9);
        assert_eq!(result.recommendation, Recommendation::Reject);
    }

    #[test]
    fn test_score_is_capped() {
        let matches = (0..10).map(|i| critical("c", i)).collect();
        let result = generic_scorer().score("generic", matches, Vec::new(), 0.1);
        assert_eq!(result.hallucination_score, 1.0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_timeouts_lower_confidence() {
        let timed_out = vec!["patterns:factual_error".to_string(); 7];
        let result = generic_scorer().score("generic", Vec::new(), timed_out, 0.1);
        assert!((result.confidence - 0.65).abs() < 1e-9);
        // No match, but confidence fell below 0.7
        assert_eq!(result.recommendation, Recommendation::Warn);
    }

    #[test]
    fn test_duplicate_matches_count_once() {
        let result = generic_scorer().score(
            "generic",
            vec![warning("w", 3), warning("w", 3)],
            Vec::new(),
            0.1,
        );
        assert_eq!(result.matched_patterns.len(), 1);
    }

    #[test]
    fn test_effective_threshold_scaling() {
        use ValidationLevel::*;
        assert!((effective_threshold(0.4, Lenient, Lenient) - 0.4).abs() < 1e-9);
        assert!((effective_threshold(0.4, Lenient, Standard) - 0.3).abs() < 1e-9);
        assert!((effective_threshold(0.4, Lenient, Strict) - 0.225).abs() < 1e-9);
        assert!((effective_threshold(0.2, Strict, Lenient) - 0.45).abs() < 1e-9);
        assert_eq!(effective_threshold(0.9, Strict, Lenient), 1.0);
    }

    #[test]
    fn test_fallback_shape() {
        let result = Scorer::fallback(1.0);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.hallucination_score, 0.0);
        assert_eq!(result.recommendation, Recommendation::Warn);
        assert_eq!(result.validator_used, FALLBACK_VALIDATOR);
    }

    prop_compose! {
        fn arb_match()(
            start in 0usize..200,
            len in 1usize..20,
            critical in any::<bool>(),
            rule in "[a-z]{1,6}",
        ) -> PatternMatch {
            let severity = if critical { Severity::Critical } else { Severity::Warning };
            PatternMatch::new(rule, HallucinationType::FactualError, severity, "m", start, start + len)
        }
    }

    proptest! {
        #[test]
        fn prop_scores_stay_in_unit_interval(
            matches in prop::collection::vec(arb_match(), 0..30),
            timeouts in 0usize..30,
        ) {
            let result = generic_scorer().score(
                "generic",
                matches,
                vec!["check".to_string(); timeouts],
                0.0,
            );
            prop_assert!((0.0..=1.0).contains(&result.hallucination_score));
            prop_assert!((0.0..=1.0).contains(&result.confidence));
        }

        #[test]
        fn prop_match_order_does_not_matter(
            matches in prop::collection::vec(arb_match(), 0..20),
        ) {
            let scorer = generic_scorer();
            let mut reversed = matches.clone();
            reversed.reverse();

            let forward = scorer.score("generic", matches, Vec::new(), 0.0);
            let backward = scorer.score("generic", reversed, Vec::new(), 0.0);
            prop_assert_eq!(forward, backward);
        }
    }
}
