//! One handler per conversation status. Handlers are pure: they return the
//! next conversation value and at most one reply, and never perform I/O.

use chrono::{DateTime, Utc};
use inkline_contracts::{Answer, Conversation, ConversationStatus, Disposition, Question, QuestionKind};

use crate::dispatch::{NewAnswer, StatusHandler, Turn, TurnPlan};
use crate::extract::{
    extract_amount, extract_dimensions, extract_place, extract_slot_choice, extract_text_answer,
    extract_time_windows,
};
use crate::handover::{missing_required, FIELD_TOUR_CITY, FIELD_TOUR_DATES, FIELD_TOUR_RESPONSE};
use crate::policy;
use crate::repair::{self, RepairDecision};
use crate::replies;
use crate::state::{self, IllegalTransition};

pub const FIELD_SELECTED_SLOT: &str = "selected_slot";
pub const FIELD_TIME_WINDOWS: &str = "time_windows";
pub const SKIPPED: &str = "skipped";

pub struct GreetingHandler;
pub struct QualifyingHandler;
pub struct SlotSelectionHandler;
pub struct TimeWindowsHandler;
pub struct TourOfferHandler;
pub struct HandoverHoldHandler;
pub struct OptedOutHandler;
pub struct ReengageHandler;
pub struct AcknowledgeHandler;

impl StatusHandler for GreetingHandler {
    fn name(&self) -> &'static str {
        "greeting"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        state::transition(&mut next, ConversationStatus::Qualifying, turn.now, None)?;
        match turn.settings.question_at(next.step) {
            Some(question) => Ok(TurnPlan::new(next, Disposition::Greeted).reply(format!(
                "{}\n\n{}",
                replies::GREETING,
                replies::prompt_for(question)
            ))),
            None => complete(turn, next, None),
        }
    }
}

/// Outcome of reading one answer for the current question.
struct Extracted {
    answer: NewAnswer,
    field_value: String,
    city: Option<String>,
}

impl StatusHandler for QualifyingHandler {
    fn name(&self) -> &'static str {
        "qualifying"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let current = turn.conversation;
        let Some(question) = turn.settings.question_at(current.step) else {
            return complete(turn, current.clone(), None);
        };

        let mut next = current.clone();
        let extracted = if !question.required && policy::is_skip(turn.text) {
            Some(Extracted {
                answer: NewAnswer {
                    question_key: question.key.clone(),
                    answer_text: turn.text.trim().to_string(),
                    normalized: Some(SKIPPED.to_string()),
                    media_ref: None,
                },
                field_value: SKIPPED.to_string(),
                city: None,
            })
        } else if is_bundle(turn, question) {
            tracing::debug!(
                conversation_id = %current.id,
                field = %question.key,
                "multi-answer bundle"
            );
            return field_failure(turn, next, &question.key, replies::bundle_reask(question));
        } else {
            extract_for(turn, question)
        };

        let Some(extracted) = extracted else {
            let attempt = next.parse_failures(&question.key) + 1;
            return field_failure(turn, next, &question.key, replies::repair_reask(question, attempt));
        };

        repair::on_parse_success(&mut next, &question.key);
        next.fields
            .insert(question.key.clone(), extracted.field_value.clone());
        state::advance_step_if_at(&mut next, current.step);

        if let Some(city) = extracted.city.as_deref() {
            if !turn.settings.is_home_city(city) {
                if let Some(stop) = turn.settings.tour_stop_for(city) {
                    state::transition(
                        &mut next,
                        ConversationStatus::TourConversionOffered,
                        turn.now,
                        None,
                    )?;
                    next.fields.insert(FIELD_TOUR_CITY.to_string(), stop.city.clone());
                    next.fields.insert(FIELD_TOUR_DATES.to_string(), stop.dates.clone());
                    let reply = replies::tour_offer(&stop.city, &stop.dates);
                    return Ok(TurnPlan::new(next, Disposition::TourOffered)
                        .answer(extracted.answer)
                        .reply(reply));
                }
            }
        }

        match turn.settings.question_at(next.step) {
            Some(following) => Ok(TurnPlan::new(next, Disposition::Advanced)
                .answer(extracted.answer)
                .reply(replies::prompt_for(following))),
            None => complete(turn, next, Some(extracted.answer)),
        }
    }
}

fn is_bundle(turn: &Turn<'_>, question: &Question) -> bool {
    !matches!(question.kind, QuestionKind::Text | QuestionKind::Media)
        && policy::looks_like_multi_answer_bundle(turn.text, turn.settings.bundle_amount_threshold)
}

fn extract_for(turn: &Turn<'_>, question: &Question) -> Option<Extracted> {
    let text = turn.text.trim();
    let answer = |normalized: String| NewAnswer {
        question_key: question.key.clone(),
        answer_text: text.to_string(),
        normalized: Some(normalized),
        media_ref: None,
    };
    match question.kind {
        QuestionKind::Text => {
            let value = extract_text_answer(text)?;
            Some(Extracted {
                answer: answer(value.clone()),
                field_value: value,
                city: None,
            })
        }
        QuestionKind::Dimensions => {
            let value = extract_dimensions(text)?.normalized();
            Some(Extracted {
                answer: answer(value.clone()),
                field_value: value,
                city: None,
            })
        }
        QuestionKind::Amount => {
            let value = extract_amount(text)?.to_string();
            Some(Extracted {
                answer: answer(value.clone()),
                field_value: value,
                city: None,
            })
        }
        QuestionKind::Place => {
            let place = extract_place(text)?;
            let value = place.normalized();
            Some(Extracted {
                answer: answer(value.clone()),
                field_value: value,
                city: place.city,
            })
        }
        QuestionKind::Media => {
            if !turn.has_media {
                return None;
            }
            let media_ref = format!("{}:{}", turn.provider, turn.message_id.unwrap_or("inline"));
            Some(Extracted {
                answer: NewAnswer {
                    question_key: question.key.clone(),
                    answer_text: text.to_string(),
                    normalized: None,
                    media_ref: Some(media_ref.clone()),
                },
                field_value: media_ref,
                city: None,
            })
        }
    }
}

/// Counts a parse failure on `field` and either re-asks or escalates.
fn field_failure(
    turn: &Turn<'_>,
    mut next: Conversation,
    field: &str,
    reask: String,
) -> Result<TurnPlan, IllegalTransition> {
    match repair::on_parse_failure(&mut next, field, turn.settings.max_parse_failures) {
        RepairDecision::SoftRepair { .. } => Ok(TurnPlan::new(next, Disposition::Repaired).reply(reask)),
        RepairDecision::Escalate { .. } => {
            hand_over(&mut next, &format!("parse_failure:{field}"), turn.now)?;
            Ok(TurnPlan::new(next, Disposition::Escalated)
                .reply(replies::HANDOVER_NOTICE)
                .with_handover())
        }
    }
}

/// Moves to `NEEDS_ARTIST_REPLY` and stamps the hold clock so the holding
/// message does not follow straight after the handover notice.
fn hand_over(next: &mut Conversation, reason: &str, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    state::transition(next, ConversationStatus::NeedsArtistReply, now, Some(reason))?;
    next.handover_last_hold_reply_at = Some(now);
    Ok(())
}

/// Wraps up qualification once the catalogue is exhausted.
fn complete(
    turn: &Turn<'_>,
    mut next: Conversation,
    answer: Option<NewAnswer>,
) -> Result<TurnPlan, IllegalTransition> {
    let mut answers: Vec<Answer> = turn.answers.to_vec();
    if let Some(new) = &answer {
        answers.push(Answer {
            conversation_id: next.id.clone(),
            seq: u64::MAX,
            question_key: new.question_key.clone(),
            answer_text: new.answer_text.clone(),
            normalized: new.normalized.clone(),
            created_at: turn.now,
            media_ref: new.media_ref.clone(),
        });
    }
    let missing = missing_required(&turn.settings.questions, &answers);

    let plan = if missing.is_empty() {
        state::transition(&mut next, ConversationStatus::PendingApproval, turn.now, None)?;
        TurnPlan::new(next, Disposition::Completed).reply(replies::COMPLETED)
    } else {
        tracing::warn!(
            conversation_id = %next.id,
            missing = %missing.join(","),
            "catalogue exhausted with required answers missing"
        );
        hand_over(&mut next, &format!("incomplete:{}", missing.join(",")), turn.now)?;
        TurnPlan::new(next, Disposition::HandedOver)
            .reply(replies::HANDOVER_NOTICE)
            .with_handover()
    };
    Ok(match answer {
        Some(answer) => plan.answer(answer),
        None => plan,
    })
}

impl StatusHandler for TourOfferHandler {
    fn name(&self) -> &'static str {
        "tour_offer"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        if policy::is_affirmative(turn.text) {
            repair::on_parse_success(&mut next, "tour_offer");
            next.fields
                .insert(FIELD_TOUR_RESPONSE.to_string(), "accepted".to_string());
            state::transition(&mut next, ConversationStatus::Qualifying, turn.now, None)?;
            return match turn.settings.question_at(next.step) {
                Some(question) => Ok(TurnPlan::new(next, Disposition::TourAccepted)
                    .reply(replies::prompt_for(question))),
                None => complete(turn, next, None),
            };
        }
        if policy::is_negative(turn.text) {
            repair::on_parse_success(&mut next, "tour_offer");
            next.fields
                .insert(FIELD_TOUR_RESPONSE.to_string(), "declined".to_string());
            state::transition(&mut next, ConversationStatus::Waitlisted, turn.now, None)?;
            return Ok(TurnPlan::new(next, Disposition::Waitlisted).reply(replies::WAITLISTED));
        }
        field_failure(
            turn,
            next,
            "tour_offer",
            replies::TOUR_OFFER_REASK.to_string(),
        )
    }
}

impl StatusHandler for SlotSelectionHandler {
    fn name(&self) -> &'static str {
        "slot_selection"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        let slots = &turn.conversation.offered_slots;
        if slots.is_empty() || policy::is_negative(turn.text) {
            state::transition(
                &mut next,
                ConversationStatus::CollectingTimeWindows,
                turn.now,
                None,
            )?;
            return Ok(TurnPlan::new(next, Disposition::WindowsRequested)
                .reply(replies::TIME_WINDOWS_REQUEST));
        }

        let Some(index) =
            extract_slot_choice(turn.text, slots, turn.settings.slot_tolerance_minutes)
        else {
            return field_failure(turn, next, "slot", replies::slot_reask(slots));
        };
        let slot = &slots[index];
        repair::on_parse_success(&mut next, "slot");
        next.fields
            .insert(FIELD_SELECTED_SLOT.to_string(), slot.label.clone());
        state::transition(&mut next, ConversationStatus::Booked, turn.now, None)?;
        Ok(TurnPlan::new(next, Disposition::SlotBooked)
            .answer(NewAnswer {
                question_key: "slot".to_string(),
                answer_text: turn.text.trim().to_string(),
                normalized: Some(slot.start.format("%Y-%m-%dT%H:%M").to_string()),
                media_ref: None,
            })
            .reply(replies::slot_booked(slot)))
    }
}

impl StatusHandler for TimeWindowsHandler {
    fn name(&self) -> &'static str {
        "time_windows"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        let Some(windows) = extract_time_windows(turn.text) else {
            return field_failure(
                turn,
                next,
                FIELD_TIME_WINDOWS,
                replies::TIME_WINDOWS_REASK.to_string(),
            );
        };
        repair::on_parse_success(&mut next, FIELD_TIME_WINDOWS);
        next.fields
            .insert(FIELD_TIME_WINDOWS.to_string(), windows.clone());
        state::transition(&mut next, ConversationStatus::NeedsFollowUp, turn.now, None)?;
        Ok(TurnPlan::new(next, Disposition::WindowsCollected)
            .answer(NewAnswer {
                question_key: FIELD_TIME_WINDOWS.to_string(),
                answer_text: turn.text.trim().to_string(),
                normalized: Some(windows),
                media_ref: None,
            })
            .reply(replies::TIME_WINDOWS_ACK))
    }
}

impl StatusHandler for HandoverHoldHandler {
    fn name(&self) -> &'static str {
        "handover_hold"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        if policy::is_resume_request(turn.text) {
            let target = resume_target(next.handover_return_status);
            repair::on_resume(&mut next);
            state::transition(&mut next, target, turn.now, None)?;
            next.handover_last_hold_reply_at = None;
            let reply = match (target, turn.settings.question_at(next.step)) {
                (ConversationStatus::Qualifying, Some(question)) => {
                    format!("{} {}", replies::RESUME_ACK, replies::prompt_for(question))
                }
                _ => replies::RESUME_ACK.to_string(),
            };
            tracing::info!(conversation_id = %next.id, to = %target, "bot resumed");
            return Ok(TurnPlan::new(next, Disposition::Resumed).reply(reply));
        }

        if policy::handover_hold_cooldown_elapsed(
            next.handover_last_hold_reply_at,
            turn.now,
            turn.settings.hold_cooldown_hours,
        ) {
            next.handover_last_hold_reply_at = Some(turn.now);
            return Ok(TurnPlan::new(next, Disposition::Held).reply(replies::HOLD_MESSAGE));
        }
        Ok(TurnPlan::silent(next))
    }
}

fn resume_target(return_status: Option<ConversationStatus>) -> ConversationStatus {
    match return_status {
        None | Some(ConversationStatus::New) => ConversationStatus::Qualifying,
        Some(status) if state::can_transition(ConversationStatus::NeedsArtistReply, status) => status,
        Some(_) => ConversationStatus::NeedsFollowUp,
    }
}

impl StatusHandler for OptedOutHandler {
    fn name(&self) -> &'static str {
        "opted_out"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        if !policy::is_opt_back_in(turn.text) {
            return Ok(TurnPlan::silent(next));
        }
        state::restart(&mut next, turn.now)?;
        state::transition(&mut next, ConversationStatus::Qualifying, turn.now, None)?;
        let reply = match turn.settings.question_at(next.step) {
            Some(question) => format!("{}\n\n{}", replies::OPT_BACK_IN_ACK, replies::prompt_for(question)),
            None => replies::OPT_BACK_IN_ACK.to_string(),
        };
        Ok(TurnPlan::new(next, Disposition::Restarted).reply(reply))
    }
}

impl StatusHandler for ReengageHandler {
    fn name(&self) -> &'static str {
        "reengage"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let mut next = turn.conversation.clone();
        state::transition(&mut next, ConversationStatus::Qualifying, turn.now, None)?;
        match turn.settings.question_at(next.step) {
            Some(question) => Ok(TurnPlan::new(next, Disposition::Reengaged).reply(format!(
                "{} {}",
                replies::REENGAGE,
                replies::prompt_for(question)
            ))),
            None => complete(turn, next, None),
        }
    }
}

impl StatusHandler for AcknowledgeHandler {
    fn name(&self) -> &'static str {
        "acknowledge"
    }

    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
        let next = turn.conversation.clone();
        match replies::acknowledgement(next.status) {
            Some(text) => Ok(TurnPlan::new(next, Disposition::Acknowledged).reply(text)),
            None => Ok(TurnPlan::silent(next)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use crate::settings::{EngineSettings, TourSettings, TourStop};
    use chrono::{Duration, NaiveDate, TimeZone};
    use inkline_contracts::OfferedSlot;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn q(key: &str, kind: QuestionKind, required: bool) -> Question {
        Question {
            key: key.to_string(),
            prompt: format!("Prompt for {key}"),
            required,
            kind,
        }
    }

    fn settings() -> EngineSettings {
        let mut s = EngineSettings::new(vec![
            q("idea", QuestionKind::Text, true),
            q("placement", QuestionKind::Text, true),
            q("dimensions", QuestionKind::Dimensions, true),
            q("budget", QuestionKind::Amount, true),
            q("location", QuestionKind::Place, true),
            q("reference_images", QuestionKind::Media, false),
        ]);
        s.tour = Some(TourSettings {
            home_city: "London".to_string(),
            stops: vec![TourStop {
                city: "Manchester".to_string(),
                dates: "12-14 March".to_string(),
            }],
        });
        s
    }

    fn conversation(status: ConversationStatus, step: u32) -> Conversation {
        let mut c = Conversation::new("+447700900004", now());
        c.status = status;
        c.step = step;
        c
    }

    fn run_with(
        settings: &EngineSettings,
        conversation: &Conversation,
        answers: &[Answer],
        text: &str,
        has_media: bool,
    ) -> TurnPlan {
        let turn = Turn {
            conversation,
            answers,
            text,
            has_media,
            provider: "sms",
            message_id: Some("msg-1"),
            now: now(),
            settings,
        };
        dispatch(&turn).unwrap()
    }

    fn run(conversation: &Conversation, text: &str) -> TurnPlan {
        run_with(&settings(), conversation, &[], text, false)
    }

    fn stored(key: &str, text: &str) -> Answer {
        Answer {
            conversation_id: "+447700900004".to_string(),
            seq: 1,
            question_key: key.to_string(),
            answer_text: text.to_string(),
            normalized: None,
            created_at: now() - Duration::minutes(5),
            media_ref: None,
        }
    }

    #[test]
    fn hello_on_new_starts_qualifying_without_advancing() {
        let plan = run(&conversation(ConversationStatus::New, 0), "hello");
        assert_eq!(plan.conversation.status, ConversationStatus::Qualifying);
        assert_eq!(plan.conversation.step, 0);
        assert_eq!(plan.disposition, Disposition::Greeted);
        assert!(plan.reply.as_deref().unwrap().ends_with("Prompt for idea"));
        assert!(plan.answer.is_none());
    }

    #[test]
    fn dimensions_repair_then_success() {
        let start = conversation(ConversationStatus::Qualifying, 2);
        let plan = run(&start, "huge");
        assert_eq!(plan.conversation.step, 2);
        assert_eq!(plan.disposition, Disposition::Repaired);
        assert_eq!(plan.conversation.parse_failures("dimensions"), 1);
        assert!(plan.reply.is_some());
        assert!(plan.answer.is_none());

        let plan = run(&plan.conversation, "10x15cm");
        assert_eq!(plan.conversation.step, 3);
        assert_eq!(plan.conversation.parse_failures("dimensions"), 0);
        assert_eq!(plan.conversation.fields["dimensions"], "10x15cm");
        assert_eq!(plan.reply.as_deref(), Some("Prompt for budget"));
        assert_eq!(plan.answer.unwrap().normalized.as_deref(), Some("10x15cm"));
    }

    #[test]
    fn third_failure_escalates_once() {
        let mut start = conversation(ConversationStatus::Qualifying, 2);
        start.parse_failure_counts.insert("dimensions".to_string(), 2);
        let plan = run(&start, "no idea");
        assert_eq!(plan.conversation.status, ConversationStatus::NeedsArtistReply);
        assert_eq!(
            plan.conversation.handover_reason.as_deref(),
            Some("parse_failure:dimensions")
        );
        assert_eq!(plan.reply.as_deref(), Some(replies::HANDOVER_NOTICE));
        assert_eq!(plan.disposition, Disposition::Escalated);
        assert!(plan.handover);

        // Within the cooldown the bot stays quiet.
        let plan = run(&plan.conversation, "hello?");
        assert_eq!(plan.disposition, Disposition::Silent);
        assert!(plan.reply.is_none());
    }

    #[test]
    fn bundle_on_amount_question_is_a_parse_failure() {
        let plan = run(&conversation(ConversationStatus::Qualifying, 3), "£500 realism");
        assert_eq!(plan.conversation.step, 3);
        assert_eq!(plan.conversation.parse_failures("budget"), 1);
        assert!(plan.reply.unwrap().starts_with(replies::BUNDLE_REASK_SUFFIX));
    }

    #[test]
    fn text_question_accepts_style_words() {
        let plan = run(&conversation(ConversationStatus::Qualifying, 0), "500 realism roses");
        assert_eq!(plan.conversation.step, 1);
    }

    #[test]
    fn tour_city_triggers_offer_and_home_city_does_not() {
        let plan = run(&conversation(ConversationStatus::Qualifying, 4), "I'm in Manchester");
        assert_eq!(plan.conversation.status, ConversationStatus::TourConversionOffered);
        assert_eq!(plan.conversation.step, 5);
        assert_eq!(plan.conversation.fields[FIELD_TOUR_CITY], "Manchester");
        assert_eq!(plan.disposition, Disposition::TourOffered);

        let accepted = run(&plan.conversation, "yes");
        assert_eq!(accepted.conversation.status, ConversationStatus::Qualifying);
        assert_eq!(accepted.reply.as_deref(), Some("Prompt for reference_images (or reply SKIP)"));

        let declined = run(&plan.conversation, "no thanks");
        assert_eq!(declined.conversation.status, ConversationStatus::Waitlisted);

        let home = run(&conversation(ConversationStatus::Qualifying, 4), "London");
        assert_eq!(home.conversation.status, ConversationStatus::Qualifying);
        assert_eq!(home.conversation.step, 5);
    }

    #[test]
    fn optional_media_question_can_be_skipped_and_completes() {
        let answers: Vec<Answer> = ["idea", "placement", "dimensions", "budget", "location"]
            .iter()
            .map(|k| stored(k, "x"))
            .collect();
        let start = conversation(ConversationStatus::Qualifying, 5);
        let plan = run_with(&settings(), &start, &answers, "skip", false);
        assert_eq!(plan.conversation.status, ConversationStatus::PendingApproval);
        assert_eq!(plan.disposition, Disposition::Completed);
        assert_eq!(plan.answer.unwrap().normalized.as_deref(), Some(SKIPPED));
    }

    #[test]
    fn media_answer_records_reference() {
        let answers: Vec<Answer> = ["idea", "placement", "dimensions", "budget", "location"]
            .iter()
            .map(|k| stored(k, "x"))
            .collect();
        let start = conversation(ConversationStatus::Qualifying, 5);
        let plan = run_with(&settings(), &start, &answers, "", true);
        assert_eq!(plan.answer.unwrap().media_ref.as_deref(), Some("sms:msg-1"));
        assert_eq!(plan.conversation.status, ConversationStatus::PendingApproval);
    }

    #[test]
    fn completion_with_missing_required_answers_hands_over() {
        let start = conversation(ConversationStatus::Qualifying, 5);
        let plan = run_with(&settings(), &start, &[stored("idea", "rose")], "skip", false);
        assert_eq!(plan.conversation.status, ConversationStatus::NeedsArtistReply);
        assert!(plan
            .conversation
            .handover_reason
            .as_deref()
            .unwrap()
            .starts_with("incomplete:placement"));
        assert!(plan.handover);
    }

    #[test]
    fn resume_returns_to_previous_status_and_clears_counters() {
        let mut c = conversation(ConversationStatus::Qualifying, 2);
        c.parse_failure_counts.insert("dimensions".to_string(), 3);
        state::transition(&mut c, ConversationStatus::NeedsArtistReply, now(), Some("x")).unwrap();
        let plan = run(&c, "resume");
        assert_eq!(plan.conversation.status, ConversationStatus::Qualifying);
        assert!(plan.conversation.parse_failure_counts.is_empty());
        assert!(plan.reply.unwrap().ends_with("Prompt for dimensions"));
    }

    #[test]
    fn hold_message_repeats_only_after_cooldown() {
        let mut c = conversation(ConversationStatus::NeedsArtistReply, 1);
        c.handover_last_hold_reply_at = Some(now() - Duration::hours(12));
        let plan = run(&c, "any news?");
        assert_eq!(plan.disposition, Disposition::Held);
        assert_eq!(plan.conversation.handover_last_hold_reply_at, Some(now()));

        c.handover_last_hold_reply_at = Some(now() - Duration::hours(11));
        assert_eq!(run(&c, "any news?").disposition, Disposition::Silent);
    }

    #[test]
    fn opt_back_in_restarts_from_first_question() {
        let mut c = conversation(ConversationStatus::OptOut, 4);
        c.parse_failure_counts.insert("budget".to_string(), 1);
        let plan = run(&c, "START");
        assert_eq!(plan.conversation.status, ConversationStatus::Qualifying);
        assert_eq!(plan.conversation.step, 0);
        assert!(plan.conversation.parse_failure_counts.is_empty());
        assert_eq!(plan.disposition, Disposition::Restarted);

        assert_eq!(run(&c, "hello").disposition, Disposition::Silent);
    }

    fn slots() -> Vec<OfferedSlot> {
        let day = |d: u32, h: u32| {
            NaiveDate::from_ymd_opt(2026, 3, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        vec![
            OfferedSlot {
                start: day(10, 11),
                label: "Tue 10 Mar, 11:00".to_string(),
            },
            OfferedSlot {
                start: day(12, 18),
                label: "Thu 12 Mar, 18:00".to_string(),
            },
        ]
    }

    #[test]
    fn slot_selection_books_or_repairs_ambiguity() {
        let mut c = conversation(ConversationStatus::BookingPending, 6);
        c.offered_slots = slots();

        let plan = run(&c, "option 2");
        assert_eq!(plan.conversation.status, ConversationStatus::Booked);
        assert_eq!(plan.conversation.fields[FIELD_SELECTED_SLOT], "Thu 12 Mar, 18:00");
        assert_eq!(plan.disposition, Disposition::SlotBooked);

        let plan = run(&c, "1 or 2");
        assert_eq!(plan.conversation.status, ConversationStatus::BookingPending);
        assert_eq!(plan.conversation.parse_failures("slot"), 1);
    }

    #[test]
    fn no_slots_asks_for_time_windows() {
        let c = conversation(ConversationStatus::BookingPending, 6);
        let plan = run(&c, "hi");
        assert_eq!(plan.conversation.status, ConversationStatus::CollectingTimeWindows);

        let plan = run(&plan.conversation, "weekday evenings");
        assert_eq!(plan.conversation.status, ConversationStatus::NeedsFollowUp);
        assert_eq!(plan.conversation.fields[FIELD_TIME_WINDOWS], "weekday evenings");
    }

    #[test]
    fn echoed_slot_label_books_that_slot() {
        let mut c = conversation(ConversationStatus::BookingPending, 6);
        c.offered_slots = slots();
        let plan = run(&c, "2. Thu 12 Mar, 18:00");
        assert_eq!(plan.disposition, Disposition::SlotBooked);
        assert_eq!(plan.conversation.fields[FIELD_SELECTED_SLOT], "Thu 12 Mar, 18:00");
    }

    #[test]
    fn unclear_replies_get_the_catalogued_re_asks() {
        let windows = conversation(ConversationStatus::CollectingTimeWindows, 6);
        let plan = run(&windows, "hmm");
        assert_eq!(plan.disposition, Disposition::Repaired);
        assert_eq!(plan.reply.as_deref(), Some(replies::TIME_WINDOWS_REASK));

        let tour = conversation(ConversationStatus::TourConversionOffered, 5);
        let plan = run(&tour, "maybe");
        assert_eq!(plan.disposition, Disposition::Repaired);
        assert_eq!(plan.reply.as_deref(), Some(replies::TOUR_OFFER_REASK));
        assert_eq!(plan.conversation.parse_failures("tour_offer"), 1);
    }

    #[test]
    fn stale_conversation_reengages_at_current_step() {
        let plan = run(&conversation(ConversationStatus::Stale, 3), "hi again");
        assert_eq!(plan.conversation.status, ConversationStatus::Qualifying);
        assert_eq!(plan.conversation.step, 3);
        assert_eq!(plan.disposition, Disposition::Reengaged);
    }

    #[test]
    fn acknowledging_statuses_do_not_advance() {
        let c = conversation(ConversationStatus::PendingApproval, 6);
        let plan = run(&c, "any update?");
        assert_eq!(plan.disposition, Disposition::Acknowledged);
        assert_eq!(plan.conversation, c);

        let plan = run(&conversation(ConversationStatus::Rejected, 6), "why?");
        assert_eq!(plan.disposition, Disposition::Silent);
    }
}
