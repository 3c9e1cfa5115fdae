//! Keyword policies and heuristics applied to inbound text before any
//! status handler runs.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::extract::{extract_amount, find_dimensions};

const OPT_OUT: &[&str] = &[
    "STOP",
    "STOPALL",
    "STOP ALL",
    "UNSUBSCRIBE",
    "CANCEL",
    "END",
    "QUIT",
    "OPT OUT",
    "OPTOUT",
    "OPT-OUT",
];
const OPT_BACK_IN: &[&str] = &["START", "UNSTOP", "SUBSCRIBE", "OPT IN", "OPTIN", "OPT-IN"];
const RESUME: &[&str] = &["RESUME", "CONTINUE", "CARRY ON", "BACK TO BOT"];
const HUMAN_EXACT: &[&str] = &["HUMAN", "AGENT", "PERSON", "OPERATOR", "ARTIST"];
const HUMAN_PHRASES: &[&str] = &[
    "SPEAK TO A HUMAN",
    "TALK TO A HUMAN",
    "SPEAK TO SOMEONE",
    "TALK TO SOMEONE",
    "REAL PERSON",
    "SPEAK TO THE ARTIST",
    "TALK TO THE ARTIST",
    "SPEAK TO A PERSON",
    "TALK TO A PERSON",
];
const REFUND: &[&str] = &["REFUND", "MONEY BACK", "CHARGEBACK"];
const DELETE_DATA: &[&str] = &[
    "DELETE MY DATA",
    "DELETE MY INFO",
    "DELETE MY DETAILS",
    "REMOVE MY DATA",
    "ERASE MY DATA",
    "FORGET ME",
    "GDPR",
];
const AFFIRMATIVE: &[&str] = &[
    "YES", "Y", "YEP", "YEAH", "YA", "SURE", "OK", "OKAY", "YES PLEASE", "SOUNDS GOOD", "DEAL",
    "PERFECT",
];
const NEGATIVE: &[&str] = &["NO", "N", "NOPE", "NAH", "NO THANKS", "NOT REALLY", "PASS"];
const SKIP: &[&str] = &["SKIP", "NONE", "N/A", "NA", "NO REFERENCE", "NO REFERENCES", "NOTHING"];

const AMOUNT_MARKERS: &[&str] = &[
    "£", "$", "€", "BUDGET", "GBP", "USD", "EUR", "POUNDS", "QUID", "DOLLARS", "EUROS",
];

static STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(realism|realistic|fine[\s-]?line|blackwork|traditional|neo[\s-]?traditional|watercolou?r|geometric|dotwork|tribal|minimalist|japanese|irezumi|illustrative|script|lettering|black\s+and\s+grey|black\s+and\s+gray|colou?r)\b",
    )
    .unwrap()
});
static HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s)@[a-z0-9_.]{2,}|\binstagram\b|\big:|\binsta\b").unwrap());

/// Trim, collapse inner whitespace, upper-case and drop trailing `.!?`.
pub fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .to_uppercase()
        .trim_end_matches(['.', '!', '?'])
        .trim_end()
        .to_string()
}

fn exact(text: &str, set: &[&str]) -> bool {
    let n = normalize(text);
    set.contains(&n.as_str())
}

fn contains_any(text: &str, set: &[&str]) -> bool {
    let n = normalize(text);
    set.iter().any(|needle| n.contains(needle))
}

pub fn is_opt_out(text: &str) -> bool {
    exact(text, OPT_OUT)
}

pub fn is_opt_back_in(text: &str) -> bool {
    exact(text, OPT_BACK_IN)
}

pub fn is_resume_request(text: &str) -> bool {
    exact(text, RESUME)
}

pub fn is_human_request(text: &str) -> bool {
    exact(text, HUMAN_EXACT) || contains_any(text, HUMAN_PHRASES)
}

pub fn is_refund_request(text: &str) -> bool {
    contains_any(text, REFUND)
}

pub fn is_delete_data_request(text: &str) -> bool {
    contains_any(text, DELETE_DATA)
}

pub fn is_affirmative(text: &str) -> bool {
    exact(text, AFFIRMATIVE)
}

pub fn is_negative(text: &str) -> bool {
    exact(text, NEGATIVE)
}

pub fn is_skip(text: &str) -> bool {
    exact(text, SKIP)
}

/// True when no hold message has been sent yet or at least `hours` have
/// passed since the last one. The boundary is inclusive.
pub fn handover_hold_cooldown_elapsed(
    last_hold_reply_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    hours: i64,
) -> bool {
    match last_hold_reply_at {
        None => true,
        Some(last) => now - last >= Duration::hours(hours),
    }
}

/// Heuristic for a message that answers several questions at once.
///
/// Signal kinds: a dimension pair, an amount, a style keyword, a social
/// handle. A bare number only counts as an amount when it is at least
/// `amount_threshold_major`; smaller numbers need a currency or budget marker.
/// Two or more kinds make a bundle.
pub fn looks_like_multi_answer_bundle(text: &str, amount_threshold_major: i64) -> bool {
    let mut kinds = 0;

    let rest = match find_dimensions(text) {
        Some((_, span)) => {
            kinds += 1;
            format!("{} {}", &text[..span.start], &text[span.end..])
        }
        None => text.to_string(),
    };

    if let Some(minor) = extract_amount(&rest) {
        let upper = rest.to_uppercase();
        let marked = AMOUNT_MARKERS.iter().any(|m| upper.contains(m));
        if marked || minor >= amount_threshold_major.saturating_mul(100) {
            kinds += 1;
        }
    }
    if STYLE.is_match(&rest) {
        kinds += 1;
    }
    if HANDLE.is_match(&rest) {
        kinds += 1;
    }
    kinds >= 2
}
