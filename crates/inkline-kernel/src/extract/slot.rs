use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use inkline_contracts::OfferedSlot;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static CLOCK_12H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?::([0-5]\d))?\s*(am|pm)\b").unwrap());
static CLOCK_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3])[:.h]([0-5]\d)\b").unwrap());
static NOON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(noon|midday)\b").unwrap());
static PREFIXED_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:option|number|slot|choice|no\.?)\s*(one|two|three|four|five|six)\b")
        .unwrap()
});
static ORDINAL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(first|second|third|fourth|fifth|sixth)\b").unwrap());
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\b").unwrap());
static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(monday|mon|tuesday|tues|tue|wednesday|wed|thursday|thurs|thur|thu|friday|fri|saturday|sat|sunday|sun)s?\b",
    )
    .unwrap()
});
static DAYPART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(morning|afternoon|evening|night)s?\b").unwrap());
static WINDOW_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(weekends?|weekdays?|any\s*time|anytime|any\s+day|whenever|flexible|january|february|march|april|may|june|july|august|september|october|november|december|\d{1,2}(?:st|nd|rd|th))\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Daypart {
    Morning,
    Afternoon,
    Evening,
}

impl Daypart {
    fn of(time: NaiveTime) -> Self {
        match time.hour() {
            0..=11 => Daypart::Morning,
            12..=16 => Daypart::Afternoon,
            _ => Daypart::Evening,
        }
    }
}

/// Picks one of the offered slots (zero-based index) from a free-text reply.
///
/// Accepts a bare ordinal, an `option/number/slot/choice/#` prefix, ordinal
/// words, a weekday and/or daypart phrase, or a clock time matched to the
/// nearest slot within `tolerance_minutes`. Numbers outside the offered range
/// are ignored. Anything ambiguous (two distinct in-range ordinals, several
/// matching slots, several times) is `None`.
pub fn extract_slot_choice(
    text: &str,
    slots: &[OfferedSlot],
    tolerance_minutes: i64,
) -> Option<usize> {
    if slots.is_empty() || text.trim().is_empty() {
        return None;
    }

    let (times, rest) = take_clock_times(text);
    // Day-of-month and other stray numbers never name a slot.
    let ordinals: BTreeSet<usize> = ordinals_in(&rest)
        .into_iter()
        .filter(|n| (1..=slots.len()).contains(n))
        .collect();
    if ordinals.len() >= 2 {
        return None;
    }
    if let Some(&n) = ordinals.iter().next() {
        return Some(n - 1);
    }

    let weekday = WEEKDAY
        .captures(&rest)
        .and_then(|c| parse_weekday(&c[1].to_ascii_lowercase()));
    let daypart = DAYPART.captures(&rest).and_then(|c| match c[1].to_ascii_lowercase().as_str() {
        "morning" => Some(Daypart::Morning),
        "afternoon" => Some(Daypart::Afternoon),
        "evening" | "night" => Some(Daypart::Evening),
        _ => None,
    });

    let by_day: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| weekday.map(|w| s.start.weekday() == w).unwrap_or(true))
        .map(|(i, _)| i)
        .collect();

    match times.len() {
        0 => {}
        1 => return closest_by_time(slots, &by_day, times[0], tolerance_minutes),
        _ => return None,
    }

    if weekday.is_none() && daypart.is_none() {
        return None;
    }
    let matching: Vec<usize> = by_day
        .into_iter()
        .filter(|&i| {
            daypart
                .map(|d| Daypart::of(slots[i].start.time()) == d)
                .unwrap_or(true)
        })
        .collect();
    match matching.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Accepts a reply describing general availability, e.g. "weekday evenings".
pub fn extract_time_windows(text: &str) -> Option<String> {
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return None;
    }
    let mentions_time = WEEKDAY.is_match(&trimmed)
        || DAYPART.is_match(&trimmed)
        || WINDOW_HINT.is_match(&trimmed)
        || CLOCK_12H.is_match(&trimmed)
        || CLOCK_24H.is_match(&trimmed)
        || NOON.is_match(&trimmed);
    mentions_time.then_some(trimmed)
}

fn take_clock_times(text: &str) -> (Vec<NaiveTime>, String) {
    let mut times = BTreeSet::new();
    for caps in CLOCK_12H.captures_iter(text) {
        let hour: u32 = caps[1].parse().unwrap_or(99);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        if !(1..=12).contains(&hour) {
            continue;
        }
        let pm = caps[3].eq_ignore_ascii_case("pm");
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        if let Some(t) = NaiveTime::from_hms_opt(hour24, minute, 0) {
            times.insert(t);
        }
    }
    let rest = CLOCK_12H.replace_all(text, " ");
    for caps in CLOCK_24H.captures_iter(&rest) {
        let hour: u32 = caps[1].parse().unwrap_or(99);
        let minute: u32 = caps[2].parse().unwrap_or(99);
        if let Some(t) = NaiveTime::from_hms_opt(hour, minute, 0) {
            times.insert(t);
        }
    }
    let rest = CLOCK_24H.replace_all(&rest, " ");
    if NOON.is_match(&rest) {
        if let Some(t) = NaiveTime::from_hms_opt(12, 0, 0) {
            times.insert(t);
        }
    }
    let rest = NOON.replace_all(&rest, " ").into_owned();
    (times.into_iter().collect(), rest)
}

fn ordinals_in(text: &str) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    for caps in PREFIXED_WORD.captures_iter(text) {
        if let Some(n) = word_value(&caps[1].to_ascii_lowercase()) {
            found.insert(n);
        }
    }
    let rest = PREFIXED_WORD.replace_all(text, " ");
    for caps in ORDINAL_WORD.captures_iter(&rest) {
        if let Some(n) = word_value(&caps[1].to_ascii_lowercase()) {
            found.insert(n);
        }
    }
    for caps in NUMBER.captures_iter(&rest) {
        if let Ok(n) = caps[1].parse::<usize>() {
            found.insert(n);
        }
    }
    found
}

fn word_value(word: &str) -> Option<usize> {
    match word {
        "one" | "first" => Some(1),
        "two" | "second" => Some(2),
        "three" | "third" => Some(3),
        "four" | "fourth" => Some(4),
        "five" | "fifth" => Some(5),
        "six" | "sixth" => Some(6),
        _ => None,
    }
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tues" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thurs" | "thur" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn closest_by_time(
    slots: &[OfferedSlot],
    candidates: &[usize],
    wanted: NaiveTime,
    tolerance_minutes: i64,
) -> Option<usize> {
    let mut best: Option<(i64, usize)> = None;
    let mut tied = false;
    for &i in candidates {
        let diff = (slots[i].start.time() - wanted).num_minutes().abs();
        if diff > tolerance_minutes {
            continue;
        }
        match best {
            Some((d, _)) if diff > d => {}
            Some((d, _)) if diff == d => tied = true,
            _ => {
                best = Some((diff, i));
                tied = false;
            }
        }
    }
    if tied {
        return None;
    }
    best.map(|(_, i)| i)
}
