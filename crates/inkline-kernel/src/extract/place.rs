use once_cell::sync::Lazy;
use regex::Regex;

static UK_POSTCODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z]{1,2}\d[a-z\d]?\s*\d[a-z]{2})\b").unwrap());
static ZIP_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5}(?:-\d{4})?)\b").unwrap());
static FLEXIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(flexible|anywhere|wherever|any\s+city|(?:will|can|happy\s+to|willing\s+to)\s+travel|don'?t\s+mind)\b",
    )
    .unwrap()
});
static CLAUSE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[,.;!?()\n]|\s(?:but|and|though|or|so)\s").unwrap());

const LEADING_FILLER: &[&str] = &[
    "i'm", "im", "i", "am", "currently", "living", "live", "based", "located", "in", "from",
    "near", "around", "at", "the",
];
const TRAILING_FILLER: &[&str] = &["area", "city", "uk", "please", "thanks", "way", "ish"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub flexible: bool,
}

impl Place {
    pub fn normalized(&self) -> String {
        match (&self.city, &self.postcode) {
            (Some(city), _) => city.clone(),
            (None, Some(postcode)) => postcode.clone(),
            (None, None) => "flexible".to_string(),
        }
    }
}

/// Best-effort city / postcode / flexibility reading. Returns `None` only when
/// none of the three can be found.
pub fn extract_place(text: &str) -> Option<Place> {
    let flexible = FLEXIBLE.is_match(text);

    let postcode_match = UK_POSTCODE
        .find(text)
        .filter(|m| m.as_str().chars().any(|c| c.is_ascii_alphabetic()))
        .or_else(|| ZIP_CODE.find(text));
    let postcode = postcode_match.map(|m| {
        m.as_str()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase()
    });
    let without_postcode = match postcode_match {
        Some(m) => format!("{} {}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    };
    let without_flex = FLEXIBLE.replace_all(&without_postcode, " ");

    let first_clause = CLAUSE_BREAK
        .split(&without_flex)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let city = city_from_clause(first_clause);

    if city.is_none() && postcode.is_none() && !flexible {
        return None;
    }
    Some(Place {
        city,
        postcode,
        flexible,
    })
}

fn city_from_clause(clause: &str) -> Option<String> {
    let cleaned: String = clause
        .chars()
        .map(|c| {
            if c.is_alphabetic() || c == '-' || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(first) = words.first() {
        if LEADING_FILLER.contains(&first.to_lowercase().as_str()) {
            words.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = words.last() {
        if TRAILING_FILLER.contains(&last.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    if words.is_empty() || words.len() > 4 {
        return None;
    }
    Some(
        words
            .iter()
            .map(|w| title_case(w))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn title_case(word: &str) -> String {
    word.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}
