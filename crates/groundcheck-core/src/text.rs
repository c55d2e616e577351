//! Small text utilities shared by validators: number parsing, sentence
//! splitting and inflection-tolerant word comparison.

use chrono::NaiveDate;

/// Parse a decimal that may use a comma as separator ("4,50", "-3.5").
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a money amount into grosze (hundredths), e.g. "8.49" -> 849.
///
/// Exact integer arithmetic avoids float drift when re-summing receipts.
pub fn parse_grosze(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (whole, fraction) = match digits.find(['.', ',']) {
        Some(idx) => (&digits[..idx], &digits[idx + 1..]),
        None => (digits, ""),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let value = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -value } else { value })
}

/// Convert a floating amount (as supplied in hints) to grosze.
pub fn grosze_from_f64(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

/// Split text into sentences with their starting byte offsets.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace (or the end of
/// text), or at a newline. Decimal points and URLs therefore stay intact.
pub fn sentences(text: &str) -> Vec<(usize, &str)> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let boundary = match ch {
            '\n' => Some(idx),
            '.' | '!' | '?' => match chars.peek() {
                None => Some(idx + ch.len_utf8()),
                Some((_, next)) if next.is_whitespace() => Some(idx + ch.len_utf8()),
                _ => None,
            },
            _ => None,
        };

        if let Some(end) = boundary {
            push_trimmed(text, start, end, &mut result);
            start = if ch == '\n' { idx + 1 } else { end };
        }
    }
    push_trimmed(text, start, text.len(), &mut result);

    result
}

fn push_trimmed<'a>(text: &'a str, start: usize, end: usize, out: &mut Vec<(usize, &'a str)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        out.push((start + leading, trimmed));
    }
}

/// Whether two words are the same lexeme, tolerating inflected endings.
///
/// Words match when equal (case-insensitive) or when they share a prefix of
/// at least `max(3, shorter_len - 2)` characters ("mąka" / "mąki",
/// "jajka" / "jajek"). Words shorter than three characters only match exactly.
pub fn same_word(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();

    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let shorter = a.len().min(b.len());
    if shorter < 3 {
        return false;
    }

    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    common >= 3.max(shorter.saturating_sub(2))
}

/// Whether any word of `phrase` matches any word of `candidate`.
pub fn shares_word(phrase: &str, candidate: &str) -> bool {
    phrase
        .split_whitespace()
        .any(|word| candidate.split_whitespace().any(|other| same_word(word, other)))
}

/// Whether `day.month.year` names a real calendar date within `years`.
pub fn is_calendar_date(day: u32, month: u32, year: i32, years: std::ops::RangeInclusive<i32>) -> bool {
    years.contains(&year) && NaiveDate::from_ymd_opt(year, month, day).is_some()
}

/// Digits of a string, ignoring separators such as dashes and spaces.
pub fn digits_of(raw: &str) -> Vec<u32> {
    raw.chars().filter_map(|c| c.to_digit(10)).collect()
}
