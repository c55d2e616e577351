//! Recipe validation.
//!
//! Ingredients are extracted as `quantity + unit + name` ("200g mąki",
//! "2 łyżki cukru") and checked against the ingredients the agent was given.
//! Cooking times and temperatures are range-checked by pattern rules.

use lazy_static::lazy_static;
use regex::Regex;

use super::{SemanticCheck, Validator, ValidatorError};
use crate::config::{
    AgentValidationConfig, FLAG_ALLOW_ADDITIONAL_INGREDIENTS, FLAG_MAX_ADDITIONAL_INGREDIENTS,
};
use crate::patterns::{PatternError, PatternRule};
use crate::text::{parse_decimal, same_word, shares_word};
use crate::types::{HallucinationType, PatternMatch, Severity, ValidationInput};

/// Hint listing the ingredients the agent may use.
pub const HINT_AVAILABLE_INGREDIENTS: &str = "available_ingredients";

lazy_static! {
    static ref INGREDIENT_PATTERN: Regex = Regex::new(
        r"(?i)\b(\d+(?:[.,]\d+)?)\s*(kilogram(?:y|ów|a)?|kg|dag|gram(?:y|ów|a)?|g|ml|litr(?:y|ów|a)?|l|łyżecz(?:ka|ki|ek)|łyż(?:ka|ki|ek)|szklan(?:ka|ki|ek)|sztu(?:ka|ki|k)|szt)\.?\s+(\p{L}+)(?:\s+(\p{L}+))?"
    ).unwrap();

    /// Always considered available
    static ref PANTRY: Vec<&'static str> = vec![
        "sól", "soli", "pieprz", "olej", "oliwa", "masło", "cukier", "woda",
        "salt", "pepper", "oil", "olive", "butter", "sugar", "water",
    ];

    /// Words that end an ingredient name
    static ref STOPWORDS: Vec<&'static str> = vec![
        "i", "oraz", "lub", "albo", "z", "ze", "do", "na", "w", "we", "po", "od",
        "potem", "następnie", "dodaj", "wymieszaj",
        "and", "or", "with", "of", "to", "then", "the", "add", "mix",
    ];
}

/// Unit families with their plausibility ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Grams,
    Decagrams,
    Kilograms,
    Millilitres,
    Litres,
    Spoons,
    Glasses,
    Pieces,
}

impl Unit {
    fn parse(raw: &str) -> Option<Unit> {
        let unit = raw.to_lowercase();
        let unit = unit.as_str();
        if unit == "kg" || unit.starts_with("kilogram") {
            Some(Unit::Kilograms)
        } else if unit == "dag" {
            Some(Unit::Decagrams)
        } else if unit == "g" || unit.starts_with("gram") {
            Some(Unit::Grams)
        } else if unit == "ml" {
            Some(Unit::Millilitres)
        } else if unit == "l" || unit.starts_with("litr") {
            Some(Unit::Litres)
        } else if unit.starts_with("łyż") {
            Some(Unit::Spoons)
        } else if unit.starts_with("szklan") {
            Some(Unit::Glasses)
        } else if unit.starts_with("szt") {
            Some(Unit::Pieces)
        } else {
            None
        }
    }

    fn max_quantity(&self) -> f64 {
        match self {
            Unit::Grams => 5000.0,
            Unit::Decagrams => 500.0,
            Unit::Kilograms => 10.0,
            Unit::Millilitres => 5000.0,
            Unit::Litres => 10.0,
            Unit::Spoons => 30.0,
            Unit::Glasses => 20.0,
            Unit::Pieces => 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Ingredient {
    quantity: f64,
    unit: Unit,
    name: String,
    text: String,
    start: usize,
    end: usize,
}

fn extract_ingredients(text: &str) -> Vec<Ingredient> {
    INGREDIENT_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let quantity = parse_decimal(caps.get(1)?.as_str())?;
            let unit = Unit::parse(caps.get(2)?.as_str())?;
            let head = caps.get(3)?;

            // The optional second word only belongs to the name when it is
            // not a connective ("mąki i ...") or a very short word.
            let tail = caps.get(4).filter(|word| {
                let lower = word.as_str().to_lowercase();
                lower.chars().count() >= 3 && !STOPWORDS.contains(&lower.as_str())
            });
            let end = tail.map(|t| t.end()).unwrap_or(head.end());

            let name = match tail {
                Some(t) => format!("{} {}", head.as_str(), t.as_str()),
                None => head.as_str().to_string(),
            };

            Some(Ingredient {
                quantity,
                unit,
                name: name.to_lowercase(),
                text: text[whole.start()..end].to_string(),
                start: whole.start(),
                end,
            })
        })
        .collect()
}

fn in_pantry(name: &str) -> bool {
    name.split_whitespace()
        .any(|word| PANTRY.iter().any(|basic| same_word(word, basic)))
}

pub(super) fn builtin_rules() -> Result<Vec<PatternRule>, PatternError> {
    Ok(vec![
        PatternRule::critical(
            "cooking_time",
            HallucinationType::FactualError,
            r"(?i)\b(\d+(?:[.,]\d+)?)\s*minut",
        )?
        .with_range(0.0, 300.0)?,
        PatternRule::critical(
            "oven_temperature",
            HallucinationType::FactualError,
            r"(?i)\b(\d+(?:[.,]\d+)?)\s*(?:stopni|°\s*C\b|℃|degrees)",
        )?
        .with_range(0.0, 300.0)?,
        PatternRule::warning(
            "resting_hours",
            HallucinationType::FactualError,
            r"(?i)\b(\d+(?:[.,]\d+)?)\s*godzin",
        )?
        .with_range(0.0, 48.0)?,
    ])
}

const CHECKS: &[SemanticCheck] = &[
    SemanticCheck::IngredientGrounding,
    SemanticCheck::IngredientQuantities,
];

/// Validates recipes produced by the chef agent.
pub struct ChefValidator;

impl ChefValidator {
    fn ingredient_grounding(
        &self,
        input: &ValidationInput,
        config: &AgentValidationConfig,
    ) -> Result<Vec<PatternMatch>, ValidatorError> {
        let available = match input.hints.string_list(HINT_AVAILABLE_INGREDIENTS)? {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };

        let allow_additional = match input.hints.flag(FLAG_ALLOW_ADDITIONAL_INGREDIENTS)? {
            Some(allowed) => allowed,
            None => config.flag_bool(FLAG_ALLOW_ADDITIONAL_INGREDIENTS).unwrap_or(false),
        };
        let max_additional = match input.hints.number(FLAG_MAX_ADDITIONAL_INGREDIENTS)? {
            Some(n) => n.max(0.0) as usize,
            None => config.flag_u64(FLAG_MAX_ADDITIONAL_INGREDIENTS).unwrap_or(2) as usize,
        };
        let tolerated = if allow_additional { max_additional } else { 0 };

        let mut unlisted = 0;
        let mut matches = Vec::new();
        for ingredient in extract_ingredients(&input.response) {
            let listed = available.iter().any(|item| shares_word(&ingredient.name, item));
            if listed || in_pantry(&ingredient.name) {
                continue;
            }

            unlisted += 1;
            if unlisted > tolerated {
                matches.push(PatternMatch::new(
                    "ingredient_grounding",
                    HallucinationType::IngredientHallucination,
                    Severity::Critical,
                    &ingredient.text,
                    ingredient.start,
                    ingredient.end,
                ));
            }
        }

        Ok(matches)
    }

    fn ingredient_quantities(&self, input: &ValidationInput) -> Vec<PatternMatch> {
        extract_ingredients(&input.response)
            .into_iter()
            .filter(|ingredient| {
                ingredient.quantity <= 0.0 || ingredient.quantity > ingredient.unit.max_quantity()
            })
            .map(|ingredient| {
                PatternMatch::new(
                    "ingredient_quantity",
                    HallucinationType::IngredientHallucination,
                    Severity::Warning,
                    &ingredient.text,
                    ingredient.start,
                    ingredient.end,
                )
            })
            .collect()
    }
}

impl Validator for ChefValidator {
    fn name(&self) -> &'static str {
        "chef"
    }

    fn semantic_checks(&self) -> &[SemanticCheck] {
        CHECKS
    }

    fn run_semantic(
        &self,
        check: SemanticCheck,
        input: &ValidationInput,
        config: &AgentValidationConfig,
    ) -> Result<Vec<PatternMatch>, ValidatorError> {
        match check {
            SemanticCheck::IngredientGrounding => self.ingredient_grounding(input, config),
            SemanticCheck::IngredientQuantities => Ok(self.ingredient_quantities(input)),
            _ => Ok(Vec::new()),
        }
    }
}
