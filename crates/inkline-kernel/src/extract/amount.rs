use once_cell::sync::Lazy;
use regex::Regex;

static DIGIT_GROUP_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[ \u{00a0}\u{202f}]+(\d{3})\b").unwrap());
static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(-\s*)?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?\s*(k)?\b").unwrap()
});
static RANGE_TAIL_K: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:-|–|to)\s*[£$€]?\s*\d+(?:\.\d{1,2})?\s*k\b").unwrap()
});

/// Parses a budget-like amount into minor units (pence/cents).
///
/// Currency symbols and words are ignored, `1,200.50` and `1 200` are read as
/// grouped numbers, `1.5k` is 1500, and a range such as `400-500` yields its
/// first bound. In `1-2k` the suffix on the upper bound applies to both.
/// Zero and negative values are rejected.
pub fn extract_amount(text: &str) -> Option<i64> {
    let cleaned = text.replace(['\u{00a0}', '\u{202f}'], " ");
    let cleaned = DIGIT_GROUP_SPACE.replace_all(&cleaned, "$1$2");

    let caps = AMOUNT.captures(&cleaned)?;
    if caps.get(1).is_some() {
        return None;
    }
    let whole: i64 = caps.get(2)?.as_str().replace(',', "").parse().ok()?;
    let fraction = match caps.get(3).map(|m| m.as_str()) {
        Some(f) if f.len() == 1 => f.parse::<i64>().ok()? * 10,
        Some(f) => f.parse::<i64>().ok()?,
        None => 0,
    };
    let mut minor = whole.checked_mul(100)?.checked_add(fraction)?;
    let whole_match = caps.get(0)?;
    let k_from_range =
        caps.get(4).is_none() && RANGE_TAIL_K.is_match(&cleaned[whole_match.end()..]);
    if caps.get(4).is_some() || k_from_range {
        minor = minor.checked_mul(1000)?;
    }
    (minor > 0).then_some(minor)
}
