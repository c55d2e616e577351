//! Receipt validation.
//!
//! The context holds the OCR'd receipt, the response is the agent's summary
//! of it. Amounts are compared in grosze so re-summing never drifts.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeSet;

use super::{SemanticCheck, Validator, ValidatorError};
use crate::config::AgentValidationConfig;
use crate::patterns::{
    date_from_captures, find_dates, find_prices, PatternError, PatternRule, AMOUNT_PATTERN,
    DATE_PATTERN,
};
use crate::text::{digits_of, grosze_from_f64, is_calendar_date, parse_grosze};
use crate::types::{HallucinationType, PatternMatch, Severity, ValidationInput};

/// Hint carrying the total the agent claims, as a number or decimal string.
pub const HINT_CLAIMED_TOTAL: &str = "claimed_total";

/// Allowed rounding difference between the item sum and the claimed total.
const TOTAL_TOLERANCE_GROSZE: i64 = 2;

const NIP_WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];
const REGON9_WEIGHTS: [u32; 8] = [8, 9, 2, 3, 4, 5, 6, 7];
const REGON14_WEIGHTS: [u32; 13] = [2, 4, 8, 5, 0, 9, 7, 3, 6, 1, 2, 4, 8];

lazy_static! {
    /// Receipt line ending in an amount: "Chleb 4.50", "Mleko 2L 3,99 zł A"
    static ref ITEM_LINE_PATTERN: Regex = Regex::new(
        r"(?im)^\s*(.*?\S)\s+(-?\d+[,.]\d{2})\s*(?:zł|pln)?\s*[A-Z]?\s*$"
    ).unwrap();

    /// Amount following a total keyword
    static ref TOTAL_PATTERN: Regex = Regex::new(
        r"(?i)(?:suma|razem|total|łącznie|do zapłaty|należność)\D{0,20}?(\d+[,.]\d{2})"
    ).unwrap();

    static ref TOTAL_KEYWORDS: Vec<&'static str> = vec![
        "suma", "razem", "total", "łącznie", "do zapłaty", "należność", "reszta", "gotówka",
    ];
}

fn is_receipt_date(caps: &Captures<'_>) -> bool {
    match date_from_captures(caps) {
        Some((day, month, year)) => is_calendar_date(day, month, year, 1990..=2100),
        None => true,
    }
}

fn checksum_mod11(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    sum % 11
}

/// Polish tax id: 10 digits, mod-11 checksum where 10 is never valid.
pub fn is_valid_nip(raw: &str) -> bool {
    let digits = digits_of(raw);
    if digits.len() != 10 {
        return false;
    }
    let check = checksum_mod11(&digits[..9], &NIP_WEIGHTS);
    check != 10 && check == digits[9]
}

/// Polish business register number: 9 or 14 digits with a mod-11 checksum
/// (10 counts as 0). 11-digit local unit numbers carry no checksum.
pub fn is_valid_regon(raw: &str) -> bool {
    let digits = digits_of(raw);
    let weights: &[u32] = match digits.len() {
        9 => &REGON9_WEIGHTS,
        14 => &REGON14_WEIGHTS,
        11 => return true,
        _ => return false,
    };
    let last = digits.len() - 1;
    checksum_mod11(&digits[..last], weights) % 10 == digits[last]
}

fn nip_capture(caps: &Captures<'_>) -> bool {
    caps.get(1).map(|m| is_valid_nip(m.as_str())).unwrap_or(true)
}

fn regon_capture(caps: &Captures<'_>) -> bool {
    caps.get(1).map(|m| is_valid_regon(m.as_str())).unwrap_or(true)
}

pub(super) fn builtin_rules() -> Result<Vec<PatternRule>, PatternError> {
    Ok(vec![
        PatternRule::warning(
            "malformed_price",
            HallucinationType::PriceHallucination,
            r"(?i)\b\d+[,.](?:\d{3,}|\d)\s*(?:zł|pln)\b",
        )?,
        PatternRule::warning(
            "price_ceiling",
            HallucinationType::PriceHallucination,
            r"(?i)\b(\d+(?:[,.]\d{2})?)\s*(?:zł|pln)\b",
        )?
        .with_range(0.0, 100_000.0)?,
        PatternRule::critical(
            "invalid_date",
            HallucinationType::DateTimeHallucination,
            DATE_PATTERN.as_str(),
        )?
        .with_check(is_receipt_date),
        PatternRule::critical(
            "nip_checksum",
            HallucinationType::FactualError,
            r"(?i)\bNIP\b[:\s]*(?:PL\s*)?(\d(?:[ -]?\d){0,16})",
        )?
        .with_check(nip_capture),
        PatternRule::critical(
            "regon_checksum",
            HallucinationType::FactualError,
            r"(?i)\bREGON\b[:\s]*(\d(?:[ -]?\d){0,16})",
        )?
        .with_check(regon_capture),
    ])
}

/// A receipt position parsed from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Item {
    label: String,
    grosze: i64,
}

fn parse_items(context: &str) -> Vec<Item> {
    ITEM_LINE_PATTERN
        .captures_iter(context)
        .filter_map(|caps| {
            let label = caps.get(1)?.as_str().trim().to_string();
            let lower = label.to_lowercase();
            if TOTAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
                return None;
            }
            let grosze = parse_grosze(caps.get(2)?.as_str())?;
            Some(Item { label, grosze })
        })
        .collect()
}

/// The total the response claims, with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClaimedTotal {
    grosze: i64,
    text: String,
    span: (usize, usize),
}

fn format_grosze(grosze: i64) -> String {
    let sign = if grosze < 0 { "-" } else { "" };
    format!("{}{}.{:02} zł", sign, grosze.abs() / 100, grosze.abs() % 100)
}

fn claimed_total(input: &ValidationInput) -> Result<Option<ClaimedTotal>, ValidatorError> {
    let response = &input.response;
    let prices = find_prices(response);

    if let Some(value) = input.hints.number(HINT_CLAIMED_TOTAL)? {
        let grosze = match grosze_from_f64(value) {
            Some(g) => g,
            None => return Ok(None),
        };
        // Point at the claimed amount in the response when it is there
        let claim = match prices.iter().find(|p| p.grosze == grosze) {
            Some(p) => ClaimedTotal {
                grosze,
                text: response[p.start..p.end].to_string(),
                span: (p.start, p.end),
            },
            // Hint-only claim: nothing in the response to point at
            None => ClaimedTotal {
                grosze,
                text: format_grosze(grosze),
                span: (0, 0),
            },
        };
        return Ok(Some(claim));
    }

    if let Some(caps) = TOTAL_PATTERN.captures(response) {
        if let (Some(whole), Some(amount)) = (caps.get(0), caps.get(1)) {
            if let Some(grosze) = parse_grosze(amount.as_str()) {
                return Ok(Some(ClaimedTotal {
                    grosze,
                    text: whole.as_str().to_string(),
                    span: (whole.start(), whole.end()),
                }));
            }
        }
    }

    if let [only] = prices.as_slice() {
        return Ok(Some(ClaimedTotal {
            grosze: only.grosze,
            text: response[only.start..only.end].to_string(),
            span: (only.start, only.end),
        }));
    }

    Ok(None)
}

const CHECKS: &[SemanticCheck] = &[
    SemanticCheck::ReceiptTotal,
    SemanticCheck::PriceGrounding,
    SemanticCheck::DateGrounding,
];

/// Validates receipt summaries against the receipt text.
pub struct ReceiptValidator;

impl ReceiptValidator {
    fn receipt_total(&self, input: &ValidationInput) -> Result<Vec<PatternMatch>, ValidatorError> {
        let items = parse_items(&input.context);
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let claim = match claimed_total(input)? {
            Some(claim) => claim,
            None => return Ok(Vec::new()),
        };

        let sum: i64 = items.iter().map(|item| item.grosze).sum();
        if (sum - claim.grosze).abs() <= TOTAL_TOLERANCE_GROSZE {
            return Ok(Vec::new());
        }

        tracing::debug!(
            items = items.len(),
            item_sum = sum,
            claimed = claim.grosze,
            "Receipt total does not match items"
        );
        Ok(vec![PatternMatch::new(
            "receipt_total",
            HallucinationType::FactualError,
            Severity::Critical,
            claim.text,
            claim.span.0,
            claim.span.1,
        )])
    }

    fn price_grounding(&self, input: &ValidationInput) -> Result<Vec<PatternMatch>, ValidatorError> {
        if input.context.trim().is_empty() {
            return Ok(Vec::new());
        }

        let known: BTreeSet<i64> = AMOUNT_PATTERN
            .captures_iter(&input.context)
            .filter_map(|caps| parse_grosze(caps.get(1)?.as_str()))
            .collect();
        let claimed = claimed_total(input)?.map(|claim| claim.grosze);

        Ok(find_prices(&input.response)
            .into_iter()
            .filter(|price| Some(price.grosze) != claimed && !known.contains(&price.grosze))
            .map(|price| {
                PatternMatch::new(
                    "price_grounding",
                    HallucinationType::PriceHallucination,
                    Severity::Warning,
                    &input.response[price.start..price.end],
                    price.start,
                    price.end,
                )
            })
            .collect())
    }

    fn date_grounding(&self, input: &ValidationInput) -> Vec<PatternMatch> {
        let known: BTreeSet<(u32, u32, i32)> =
            find_dates(&input.context).into_iter().map(|(date, _, _)| date).collect();
        if known.is_empty() {
            return Vec::new();
        }

        find_dates(&input.response)
            .into_iter()
            .filter(|(date, _, _)| !known.contains(date))
            .map(|(_, start, end)| {
                PatternMatch::new(
                    "date_grounding",
                    HallucinationType::DateTimeHallucination,
                    Severity::Warning,
                    &input.response[start..end],
                    start,
                    end,
                )
            })
            .collect()
    }
}

impl Validator for ReceiptValidator {
    fn name(&self) -> &'static str {
        "receipt"
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
        match check {
            SemanticCheck::ReceiptTotal => self.receipt_total(input),
            SemanticCheck::PriceGrounding => self.price_grounding(input),
            SemanticCheck::DateGrounding => Ok(self.date_grounding(input)),
            _ => Ok(Vec::new()),
        }
    }
}
