use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;

/// Anything larger is treated as a typo rather than a real measurement.
pub const MAX_DIMENSION_CM: f64 = 120.0;

const UNIT: &str = r#"(?:\s*(?:cm|mm|inches|inch)\b|in\b|"|”)"#;

static WITH_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(\d+(?:\.\d+)?)({UNIT})?\s*(?:x|×|\*|by)\s*(\d+(?:\.\d+)?)({UNIT})?"
    ))
    .unwrap()
});
static SPACE_SEPARATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s+(\d+(?:\.\d+)?)\s*(cm|mm|inches|inch)\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width_cm: f64,
    pub height_cm: f64,
}

impl Dimensions {
    pub fn area_cm2(&self) -> f64 {
        self.width_cm * self.height_cm
    }

    /// Canonical form stored on the conversation, e.g. `10x15cm`.
    pub fn normalized(&self) -> String {
        format!("{}x{}cm", format_cm(self.width_cm), format_cm(self.height_cm))
    }
}

fn format_cm(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v:.1}")
    }
}

pub fn extract_dimensions(text: &str) -> Option<Dimensions> {
    find_dimensions(text).map(|(dims, _)| dims)
}

/// Same as [`extract_dimensions`] but also returns the byte span that matched.
pub fn find_dimensions(text: &str) -> Option<(Dimensions, Range<usize>)> {
    if let Some(caps) = WITH_SEPARATOR.captures(text) {
        let unit = caps
            .get(4)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim().to_ascii_lowercase());
        let dims = build(&caps, 1, 3, unit.as_deref())?;
        return Some((dims, caps.get(0)?.range()));
    }
    let caps = SPACE_SEPARATED.captures(text)?;
    let unit = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());
    let dims = build(&caps, 1, 2, unit.as_deref())?;
    Some((dims, caps.get(0)?.range()))
}

fn build(caps: &Captures<'_>, first: usize, second: usize, unit: Option<&str>) -> Option<Dimensions> {
    let a: f64 = caps.get(first)?.as_str().parse().ok()?;
    let b: f64 = caps.get(second)?.as_str().parse().ok()?;
    let factor = match unit {
        Some("mm") => 0.1,
        Some("in") | Some("inch") | Some("inches") | Some("\"") | Some("”") => 2.54,
        _ => 1.0,
    };
    let width_cm = round_tenth(a * factor);
    let height_cm = round_tenth(b * factor);
    if width_cm <= 0.0 || height_cm <= 0.0 {
        return None;
    }
    if width_cm > MAX_DIMENSION_CM || height_cm > MAX_DIMENSION_CM {
        tracing::debug!(width_cm, height_cm, "dimensions above sanity ceiling");
        return None;
    }
    Some(Dimensions {
        width_cm,
        height_cm,
    })
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(w: f64, h: f64) -> Option<Dimensions> {
        Some(Dimensions {
            width_cm: w,
            height_cm: h,
        })
    }

    #[test]
    fn parses_separator_variants() {
        assert_eq!(extract_dimensions("10x15cm"), dims(10.0, 15.0));
        assert_eq!(extract_dimensions("10 x 15 cm"), dims(10.0, 15.0));
        assert_eq!(extract_dimensions("10×15"), dims(10.0, 15.0));
        assert_eq!(extract_dimensions("about 8 by 12cm please"), dims(8.0, 12.0));
    }

    #[test]
    fn space_separated_pair_needs_a_unit() {
        assert_eq!(extract_dimensions("10 15 cm"), dims(10.0, 15.0));
        assert_eq!(extract_dimensions("10 15"), None);
    }

    #[test]
    fn normalizes_inches_and_millimetres() {
        assert_eq!(extract_dimensions("4x6 inches"), dims(10.2, 15.2));
        assert_eq!(extract_dimensions("4in x 6in"), dims(10.2, 15.2));
        assert_eq!(extract_dimensions("50x80mm"), dims(5.0, 8.0));
    }

    #[test]
    fn rejects_values_above_ceiling_or_zero() {
        assert_eq!(extract_dimensions("10x1500cm"), None);
        assert_eq!(extract_dimensions("0x10"), None);
        assert_eq!(extract_dimensions("huge"), None);
    }

    #[test]
    fn normalized_form_drops_trailing_zero() {
        assert_eq!(extract_dimensions("10x15cm").unwrap().normalized(), "10x15cm");
        assert_eq!(extract_dimensions("4x6in").unwrap().normalized(), "10.2x15.2cm");
    }

    #[test]
    fn reports_matched_span() {
        let (_, span) = find_dimensions("10x15 £500").unwrap();
        assert_eq!(&"10x15 £500"[span], "10x15");
    }
}
