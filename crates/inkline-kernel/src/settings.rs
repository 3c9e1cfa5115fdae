use inkline_contracts::Question;

use crate::repair::DEFAULT_MAX_PARSE_FAILURES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TourStop {
    pub city: String,
    pub dates: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TourSettings {
    pub home_city: String,
    pub stops: Vec<TourStop>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingSettings {
    pub rate_per_cm2_minor: i64,
    pub minimum_minor: i64,
    pub spread_percent: i64,
    pub currency: String,
}

/// Read-only engine settings, built once from the loaded config and shared
/// by every turn.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub questions: Vec<Question>,
    pub max_parse_failures: u32,
    pub hold_cooldown_hours: i64,
    pub slot_tolerance_minutes: i64,
    pub bundle_amount_threshold: i64,
    pub recent_message_tail: usize,
    pub tour: Option<TourSettings>,
    pub pricing: Option<PricingSettings>,
}

impl EngineSettings {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            max_parse_failures: DEFAULT_MAX_PARSE_FAILURES,
            hold_cooldown_hours: 12,
            slot_tolerance_minutes: 90,
            bundle_amount_threshold: 100,
            recent_message_tail: 10,
            tour: None,
            pricing: None,
        }
    }

    pub fn question_at(&self, step: u32) -> Option<&Question> {
        self.questions.get(step as usize)
    }

    pub fn question_count(&self) -> u32 {
        self.questions.len() as u32
    }

    /// Tour stop for `city`, compared case-insensitively.
    pub fn tour_stop_for(&self, city: &str) -> Option<&TourStop> {
        self.tour
            .as_ref()?
            .stops
            .iter()
            .find(|s| s.city.eq_ignore_ascii_case(city.trim()))
    }

    pub fn is_home_city(&self, city: &str) -> bool {
        self.tour
            .as_ref()
            .map(|t| t.home_city.eq_ignore_ascii_case(city.trim()))
            .unwrap_or(false)
    }
}
