use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Amount, Unit};

/// Number (optionally grouped by `.`, `,`, space or NBSP, optional decimal
/// part) followed by a `QU`/`QNT` unit that ends on a word boundary.
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([0-9]{1,3}(?:[ \u{00A0},.][0-9]{3})*(?:[.,][0-9]+)?|[0-9]+(?:[.,][0-9]+)?)\s*(QU|QNT)\b",
    )
    .expect("invalid amount regex")
});

/// Substrings the bot uses while it is still working on an answer.
const IN_PROGRESS_MARKERS: [&str; 2] = ["checking balance", "sprawdzam"];

/// Legacy sentinels that older runs wrote in place of a balance.
const SENTINELS: [&str; 3] = ["—", "ERROR", "FloodWait"];

/// Resolve `.`/`,` ambiguity and drop group-separator whitespace.
///
/// Both present → `,` is a thousands separator. Only `,` → it is the decimal
/// separator.
pub fn normalize_number(raw: &str) -> String {
    let t = raw.replace('\u{00A0}', " ");
    let t = t.trim();
    let t = if t.contains('.') && t.contains(',') {
        t.replace(',', "")
    } else if t.contains(',') {
        t.replace(',', ".")
    } else {
        t.to_string()
    };
    t.replace(' ', "")
}

/// Extract the first amount with a `QU`/`QNT` unit from a bot reply.
///
/// Digits that don't fit a finite `f64` are not an amount.
pub fn parse_amount(text: &str) -> Option<Amount> {
    let caps = AMOUNT_RE.captures(text)?;
    let number = normalize_number(caps.get(1)?.as_str());
    if !number.parse::<f64>().is_ok_and(f64::is_finite) {
        return None;
    }
    let unit = if caps.get(2)?.as_str().to_uppercase().contains("QU") {
        Unit::Qu
    } else {
        Unit::Qnt
    };
    Some(Amount { number, unit })
}

/// Whether a bot message is an echo or progress note rather than an answer.
///
/// `command` is the full command that was sent, e.g. `/balance qz...`; any
/// reply starting with its verb counts as an echo.
pub fn is_placeholder(text: &str, command: &str) -> bool {
    let t = text.trim().to_lowercase();
    if t.is_empty() {
        return true;
    }
    let verb = command
        .split_whitespace()
        .next()
        .unwrap_or(command)
        .to_lowercase();
    if !verb.is_empty() && t.starts_with(&verb) {
        return true;
    }
    if IN_PROGRESS_MARKERS.iter().any(|m| t.contains(m)) {
        return true;
    }
    // Any unit mention, including one glued to the digits, makes it final
    t.contains("balance") && !t.contains("qnt") && !t.contains(" qu") && !AMOUNT_RE.is_match(&t)
}

/// Convert a `"value unit"` string back to a float.
///
/// Never fails: sentinels, empty input, unparseable and non-finite digits
/// all yield `0.0`.
pub fn parse_balance(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() || SENTINELS.contains(&t) {
        return 0.0;
    }
    normalize_number(strip_unit(t))
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn strip_unit(t: &str) -> &str {
    for unit in [Unit::Qnt, Unit::Qu] {
        let unit = unit.as_str();
        let Some(split) = t.len().checked_sub(unit.len()) else {
            continue;
        };
        if t.is_char_boundary(split) && t[split..].eq_ignore_ascii_case(unit) {
            return &t[..split];
        }
    }
    t
}
