//! Read-only handover packet assembly.

use chrono::{DateTime, Utc};
use inkline_contracts::{
    Answer, Conversation, ConversationStatus, HandoverPacket, Message, PacketAnswer, PriceEstimate,
    Question, TourContext,
};
use std::collections::BTreeMap;

use crate::extract::extract_dimensions;
use crate::settings::PricingSettings;

pub const FIELD_TOUR_CITY: &str = "tour_city";
pub const FIELD_TOUR_DATES: &str = "tour_dates";
pub const FIELD_TOUR_RESPONSE: &str = "tour_response";

/// Latest answer per `question_key`. Ordering contract: the greatest
/// `(created_at, seq)` wins, so rows sharing a timestamp fall back to
/// insertion order.
pub fn latest_answer_per_key(answers: &[Answer]) -> BTreeMap<String, Answer> {
    let mut latest: BTreeMap<String, Answer> = BTreeMap::new();
    for answer in answers {
        let replace = match latest.get(&answer.question_key) {
            Some(current) => (answer.created_at, answer.seq) > (current.created_at, current.seq),
            None => true,
        };
        if replace {
            latest.insert(answer.question_key.clone(), answer.clone());
        }
    }
    latest
}

/// Keys of required questions with no answer on record.
pub fn missing_required(questions: &[Question], answers: &[Answer]) -> Vec<String> {
    let latest = latest_answer_per_key(answers);
    questions
        .iter()
        .filter(|q| q.required && !latest.contains_key(&q.key))
        .map(|q| q.key.clone())
        .collect()
}

/// Rough quote range from the stored `dimensions` field: area times rate,
/// floored at the minimum, widened by `spread_percent` either side.
pub fn estimate_price(
    fields: &BTreeMap<String, String>,
    pricing: &PricingSettings,
) -> Option<PriceEstimate> {
    let dims = extract_dimensions(fields.get("dimensions")?)?;
    let raw = (dims.area_cm2() * pricing.rate_per_cm2_minor as f64).round() as i64;
    let base = raw.max(pricing.minimum_minor);
    let spread = base * pricing.spread_percent / 100;
    Some(PriceEstimate {
        low_minor: (base - spread).max(pricing.minimum_minor),
        high_minor: base + spread,
        currency: pricing.currency.clone(),
    })
}

fn tour_context(conversation: &Conversation) -> Option<TourContext> {
    let city = conversation.fields.get(FIELD_TOUR_CITY).cloned();
    let response = conversation.fields.get(FIELD_TOUR_RESPONSE).map(String::as_str);
    let waitlisted = conversation.status == ConversationStatus::Waitlisted;
    if city.is_none() && !waitlisted {
        return None;
    }
    Some(TourContext {
        city,
        dates: conversation.fields.get(FIELD_TOUR_DATES).cloned(),
        accepted: match response {
            Some("accepted") => Some(true),
            Some("declined") => Some(false),
            _ => None,
        },
        waitlisted,
    })
}

pub fn build_handover_packet(
    conversation: &Conversation,
    questions: &[Question],
    answers: &[Answer],
    messages: &[Message],
    pricing: Option<&PricingSettings>,
    tail_len: usize,
    now: DateTime<Utc>,
) -> Result<HandoverPacket, String> {
    let mut latest = latest_answer_per_key(answers);
    let mut ordered = Vec::with_capacity(latest.len());
    for question in questions {
        if let Some(answer) = latest.remove(&question.key) {
            ordered.push(answer);
        }
    }
    ordered.extend(latest.into_values());

    let mut tail: Vec<Message> = messages.to_vec();
    tail.sort_by(|a, b| (a.at, a.seq).cmp(&(b.at, b.seq)));
    let skip = tail.len().saturating_sub(tail_len);
    let recent_messages = tail.split_off(skip);

    let mut packet = HandoverPacket {
        conversation_id: conversation.id.clone(),
        status: conversation.status,
        reason: conversation.handover_reason.clone(),
        answers: ordered
            .into_iter()
            .map(|a| PacketAnswer {
                question_key: a.question_key,
                answer_text: a.answer_text,
                normalized: a.normalized,
                created_at: a.created_at,
                media_ref: a.media_ref,
            })
            .collect(),
        parse_failures: conversation
            .parse_failure_counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(k, n)| (k.clone(), *n))
            .collect(),
        price_estimate: pricing.and_then(|p| estimate_price(&conversation.fields, p)),
        tour: tour_context(conversation),
        recent_messages,
        generated_at: now,
        digest: String::new(),
    };
    packet.digest = packet_digest(&packet)?;
    Ok(packet)
}

/// JCS SHA-256 of the packet body without `generated_at` and `digest`, so the
/// same content always yields the same digest.
pub fn packet_digest(packet: &HandoverPacket) -> Result<String, String> {
    let mut value = serde_json::to_value(packet).map_err(|err| err.to_string())?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("generated_at");
        obj.remove("digest");
    }
    crate::jcs_sha256_hex(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use inkline_contracts::{Direction, QuestionKind};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn answer(key: &str, text: &str, at: DateTime<Utc>, seq: u64) -> Answer {
        Answer {
            conversation_id: "c1".to_string(),
            seq,
            question_key: key.to_string(),
            answer_text: text.to_string(),
            normalized: None,
            created_at: at,
            media_ref: None,
        }
    }

    fn question(key: &str, required: bool) -> Question {
        Question {
            key: key.to_string(),
            prompt: format!("{key}?"),
            required,
            kind: QuestionKind::Text,
        }
    }

    fn pricing() -> PricingSettings {
        PricingSettings {
            rate_per_cm2_minor: 150,
            minimum_minor: 8_000,
            spread_percent: 25,
            currency: "GBP".to_string(),
        }
    }

    #[test]
    fn later_answer_wins() {
        let answers = vec![
            answer("budget", "300", t0() + Duration::minutes(5), 1),
            answer("budget", "250", t0(), 2),
        ];
        let latest = latest_answer_per_key(&answers);
        assert_eq!(latest["budget"].answer_text, "300");
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let answers = vec![answer("idea", "rose", t0(), 2), answer("idea", "koi", t0(), 1)];
        assert_eq!(latest_answer_per_key(&answers)["idea"].answer_text, "rose");
    }

    #[test]
    fn missing_required_ignores_optional_questions() {
        let questions = vec![question("idea", true), question("refs", false), question("budget", true)];
        let answers = vec![answer("idea", "rose", t0(), 1)];
        assert_eq!(missing_required(&questions, &answers), vec!["budget".to_string()]);
    }

    #[test]
    fn price_estimate_applies_minimum_and_spread() {
        let mut fields = BTreeMap::new();
        fields.insert("dimensions".to_string(), "10x15cm".to_string());
        let estimate = estimate_price(&fields, &pricing()).unwrap();
        // 150 cm2 * 150 = 22_500
        assert_eq!(estimate.low_minor, 16_875);
        assert_eq!(estimate.high_minor, 28_125);

        fields.insert("dimensions".to_string(), "2x2cm".to_string());
        let estimate = estimate_price(&fields, &pricing()).unwrap();
        assert_eq!(estimate.low_minor, 8_000);
        assert_eq!(estimate.high_minor, 10_000);

        fields.remove("dimensions");
        assert!(estimate_price(&fields, &pricing()).is_none());
    }

    #[test]
    fn packet_exposes_latest_answers_counts_and_tail() {
        let mut conversation = Conversation::new("c1", t0());
        conversation.status = ConversationStatus::NeedsArtistReply;
        conversation.handover_reason = Some("parse_failure:dimensions".to_string());
        conversation.parse_failure_counts.insert("dimensions".to_string(), 3);
        conversation.parse_failure_counts.insert("budget".to_string(), 0);
        conversation.fields.insert(FIELD_TOUR_CITY.to_string(), "Manchester".to_string());
        conversation.fields.insert(FIELD_TOUR_RESPONSE.to_string(), "accepted".to_string());

        let questions = vec![question("idea", true), question("placement", true)];
        let answers = vec![
            answer("placement", "forearm", t0(), 1),
            answer("idea", "rose", t0(), 2),
            answer("idea", "peony", t0() + Duration::minutes(1), 3),
            answer("extra", "note", t0(), 4),
        ];
        let messages: Vec<Message> = (0..5)
            .map(|i| Message {
                conversation_id: "c1".to_string(),
                seq: i,
                direction: Direction::Inbound,
                text: format!("m{i}"),
                at: t0() + Duration::minutes(i as i64),
            })
            .collect();

        let packet =
            build_handover_packet(&conversation, &questions, &answers, &messages, None, 3, t0())
                .unwrap();
        let keys: Vec<_> = packet.answers.iter().map(|a| a.question_key.as_str()).collect();
        assert_eq!(keys, vec!["idea", "placement", "extra"]);
        assert_eq!(packet.answers[0].answer_text, "peony");
        assert_eq!(packet.parse_failures.len(), 1);
        assert_eq!(packet.parse_failures["dimensions"], 3);
        let tail: Vec<_> = packet.recent_messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(tail, vec!["m2", "m3", "m4"]);
        let tour = packet.tour.as_ref().unwrap();
        assert_eq!(tour.city.as_deref(), Some("Manchester"));
        assert_eq!(tour.accepted, Some(true));
        assert!(!tour.waitlisted);
        assert_eq!(packet.digest.len(), 64);
    }

    #[test]
    fn digest_ignores_generation_time() {
        let conversation = Conversation::new("c1", t0());
        let a = build_handover_packet(&conversation, &[], &[], &[], None, 10, t0()).unwrap();
        let b = build_handover_packet(
            &conversation,
            &[],
            &[],
            &[],
            None,
            10,
            t0() + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(a.digest, b.digest);
    }
}
