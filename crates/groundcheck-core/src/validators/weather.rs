//! Weather report validation: physically plausible ranges only.

use regex::Captures;

use super::Validator;
use crate::patterns::{PatternError, PatternRule};
use crate::text::parse_decimal;
use crate::types::HallucinationType;

fn plausible_temperature(caps: &Captures<'_>) -> bool {
    let value = match caps.get(1).and_then(|m| parse_decimal(m.as_str())) {
        Some(value) => value,
        None => return true,
    };
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();

    if unit.contains('f') || unit.contains('℉') {
        (-150.0..=150.0).contains(&value)
    } else {
        (-100.0..=100.0).contains(&value)
    }
}

pub(super) fn builtin_rules() -> Result<Vec<PatternRule>, PatternError> {
    let weather = HallucinationType::WeatherHallucination;
    Ok(vec![
        PatternRule::critical(
            "temperature",
            weather,
            r"(?i)(-?\d+(?:[.,]\d+)?)\s*(°\s*[CF]\b|℃|℉|stopni(?:e|a)?(?:\s+(?:celsjusza|fahrenheita))?)",
        )?
        .with_check(plausible_temperature),
        PatternRule::critical("humidity", weather, r"(-?\d+(?:[.,]\d+)?)\s*%")?.with_range(0.0, 100.0)?,
        PatternRule::critical("wind_kmh", weather, r"(?i)(-?\d+(?:[.,]\d+)?)\s*km\s*/\s*h")?
            .with_range(0.0, 500.0)?,
        PatternRule::critical("wind_ms", weather, r"(?i)(-?\d+(?:[.,]\d+)?)\s*m\s*/\s*s\b")?
            .with_range(0.0, 140.0)?,
        PatternRule::critical("pressure", weather, r"(?i)(-?\d+(?:[.,]\d+)?)\s*hpa\b")?
            .with_range(850.0, 1100.0)?,
    ])
}

/// Validates weather reports.
pub struct WeatherValidator;

impl Validator for WeatherValidator {
    fn name(&self) -> &'static str {
        "weather"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentValidationConfig;
    use crate::types::{Recommendation, ValidationInput, ValidationResult};
    use crate::validators::ValidatorKind;

    fn validate(response: &str) -> ValidationResult {
        let config = AgentValidationConfig::builtin(ValidatorKind::Weather).unwrap();
        WeatherValidator
            .validate(&ValidationInput::new("weather", response), &config, config.validation_level)
            .unwrap()
    }

    #[test]
    fn test_implausible_temperature_flagged() {
        let result = validate("Jutro będzie 150 stopni.");
        assert_eq!(result.count_of(HallucinationType::WeatherHallucination), 1);
        assert_eq!(result.matched_patterns[0].matched_text, "150 stopni");
        assert_ne!(result.recommendation, Recommendation::Accept);
    }

    #[test]
    fn test_plausible_temperature_accepted() {
        let result = validate("Jutro będzie 22 stopni.");
        assert!(result.matched_patterns.is_empty());
        assert_eq!(result.recommendation, Recommendation::Accept);
    }

    #[test]
    fn test_temperature_units() {
        assert!(validate("Upał: 120°F w Arizonie").matched_patterns.is_empty());
        assert_eq!(validate("Upał: 120°C w Arizonie").matched_patterns.len(), 1);
        assert!(validate("Mróz -25 stopni Celsjusza").matched_patterns.is_empty());
        assert_eq!(validate("Mróz -160 stopni Fahrenheita").matched_patterns.len(), 1);
        assert!(validate("Rano 12,5 ℃").matched_patterns.is_empty());
    }

    #[test]
    fn test_other_measurements() {
        let ok = validate("Wilgotność 65%, wiatr 20 km/h, porywy 12 m/s, ciśnienie 1013 hPa.");
        assert!(ok.matched_patterns.is_empty());

        let bad = validate("Wilgotność 140%, wiatr 650 km/h, ciśnienie 700 hPa.");
        let rules: Vec<&str> = bad.matched_patterns.iter().map(|m| m.rule.as_str()).collect();
        assert_eq!(rules, vec!["humidity", "wind_kmh", "pressure"]);
        // Three critical matches exceed the lenient threshold
        assert_eq!(bad.recommendation, Recommendation::Reject);
    }
}
