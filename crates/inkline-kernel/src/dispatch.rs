//! Routes one admitted inbound message to the handler for the conversation's
//! status, after the keyword policies that apply regardless of status.

use chrono::{DateTime, Utc};
use inkline_contracts::{Answer, Conversation, ConversationStatus, Disposition};

use crate::handlers::{
    AcknowledgeHandler, GreetingHandler, HandoverHoldHandler, OptedOutHandler, QualifyingHandler,
    ReengageHandler, SlotSelectionHandler, TimeWindowsHandler, TourOfferHandler,
};
use crate::policy;
use crate::replies;
use crate::settings::EngineSettings;
use crate::state::{self, IllegalTransition};

/// Everything a handler may read for one inbound message.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub conversation: &'a Conversation,
    pub answers: &'a [Answer],
    pub text: &'a str,
    pub has_media: bool,
    pub provider: &'a str,
    pub message_id: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub settings: &'a EngineSettings,
}

/// Answer row to append when the turn commits. `seq` and `created_at` are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnswer {
    pub question_key: String,
    pub answer_text: String,
    pub normalized: Option<String>,
    pub media_ref: Option<String>,
}

/// What the engine should send and then commit for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPlan {
    pub conversation: Conversation,
    pub answer: Option<NewAnswer>,
    pub reply: Option<String>,
    pub disposition: Disposition,
    pub handover: bool,
}

impl TurnPlan {
    pub fn new(conversation: Conversation, disposition: Disposition) -> Self {
        Self {
            conversation,
            answer: None,
            reply: None,
            disposition,
            handover: false,
        }
    }

    pub fn silent(conversation: Conversation) -> Self {
        Self::new(conversation, Disposition::Silent)
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.reply = Some(text.into());
        self
    }

    pub fn answer(mut self, answer: NewAnswer) -> Self {
        self.answer = Some(answer);
        self
    }

    pub fn with_handover(mut self) -> Self {
        self.handover = true;
        self
    }
}

pub trait StatusHandler: Sync {
    fn name(&self) -> &'static str;
    fn handle(&self, turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition>;
}

pub fn handler_for(status: ConversationStatus) -> &'static dyn StatusHandler {
    use ConversationStatus as S;
    match status {
        S::New => &GreetingHandler,
        S::Qualifying => &QualifyingHandler,
        S::BookingPending => &SlotSelectionHandler,
        S::CollectingTimeWindows => &TimeWindowsHandler,
        S::TourConversionOffered => &TourOfferHandler,
        S::NeedsArtistReply => &HandoverHoldHandler,
        S::OptOut => &OptedOutHandler,
        S::Abandoned | S::Stale => &ReengageHandler,
        S::PendingApproval
        | S::AwaitingDeposit
        | S::DepositPaid
        | S::Waitlisted
        | S::NeedsFollowUp
        | S::Booked
        | S::Rejected => &AcknowledgeHandler,
    }
}

pub fn dispatch(turn: &Turn<'_>) -> Result<TurnPlan, IllegalTransition> {
    if let Some(plan) = apply_keyword_policies(turn)? {
        return Ok(plan);
    }
    let handler = handler_for(turn.conversation.status);
    let plan = handler.handle(turn)?;
    tracing::debug!(
        conversation_id = %turn.conversation.id,
        handler = handler.name(),
        disposition = plan.disposition.as_str(),
        "turn dispatched"
    );
    Ok(plan)
}

fn apply_keyword_policies(turn: &Turn<'_>) -> Result<Option<TurnPlan>, IllegalTransition> {
    let status = turn.conversation.status;

    if policy::is_opt_out(turn.text) {
        if state::can_transition(status, ConversationStatus::OptOut) {
            let mut next = turn.conversation.clone();
            state::transition(&mut next, ConversationStatus::OptOut, turn.now, None)?;
            tracing::info!(conversation_id = %next.id, from = %status, "opt-out honoured");
            return Ok(Some(
                TurnPlan::new(next, Disposition::OptedOut).reply(replies::OPT_OUT_ACK),
            ));
        }
        if matches!(status, ConversationStatus::Booked | ConversationStatus::Rejected) {
            tracing::warn!(
                conversation_id = %turn.conversation.id,
                status = %status,
                "opt-out keyword on closed conversation"
            );
            return Ok(Some(TurnPlan::silent(turn.conversation.clone())));
        }
    }

    if matches!(
        status,
        ConversationStatus::OptOut | ConversationStatus::NeedsArtistReply
    ) {
        return Ok(None);
    }

    let request = if policy::is_refund_request(turn.text) {
        Some(("refund_request", replies::REFUND_ACK))
    } else if policy::is_delete_data_request(turn.text) {
        Some(("delete_data_request", replies::DELETE_DATA_ACK))
    } else if policy::is_human_request(turn.text) {
        Some(("human_request", replies::HUMAN_REQUEST_ACK))
    } else {
        None
    };
    let Some((reason, ack)) = request else {
        return Ok(None);
    };
    if !state::can_transition(status, ConversationStatus::NeedsArtistReply) {
        return Ok(None);
    }

    let mut next = turn.conversation.clone();
    state::transition(&mut next, ConversationStatus::NeedsArtistReply, turn.now, Some(reason))?;
    next.handover_last_hold_reply_at = Some(turn.now);
    tracing::info!(conversation_id = %next.id, reason, "handover requested");
    Ok(Some(
        TurnPlan::new(next, Disposition::HandedOver)
            .reply(ack)
            .with_handover(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use inkline_contracts::{Question, QuestionKind};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings::new(vec![Question {
            key: "idea".to_string(),
            prompt: "What would you like?".to_string(),
            required: true,
            kind: QuestionKind::Text,
        }])
    }

    fn run(conversation: &Conversation, text: &str) -> TurnPlan {
        let settings = settings();
        let turn = Turn {
            conversation,
            answers: &[],
            text,
            has_media: false,
            provider: "sms",
            message_id: Some("m1"),
            now: now(),
            settings: &settings,
        };
        dispatch(&turn).unwrap()
    }

    fn at(status: ConversationStatus) -> Conversation {
        let mut c = Conversation::new("+447700900003", now());
        c.status = status;
        c
    }

    #[test]
    fn every_status_has_a_handler() {
        for status in ConversationStatus::ALL {
            assert!(!handler_for(status).name().is_empty());
        }
    }

    #[test]
    fn opt_out_during_handover_sends_only_the_ack() {
        let mut c = at(ConversationStatus::NeedsArtistReply);
        c.handover_reason = Some("human_request".to_string());
        let plan = run(&c, "STOP");
        assert_eq!(plan.conversation.status, ConversationStatus::OptOut);
        assert_eq!(plan.reply.as_deref(), Some(replies::OPT_OUT_ACK));
        assert_eq!(plan.disposition, Disposition::OptedOut);
        assert!(plan.answer.is_none());
    }

    #[test]
    fn opt_out_on_booked_is_silent() {
        let plan = run(&at(ConversationStatus::Booked), "stop");
        assert_eq!(plan.conversation.status, ConversationStatus::Booked);
        assert!(plan.reply.is_none());
    }

    #[test]
    fn repeated_opt_out_stays_silent() {
        let plan = run(&at(ConversationStatus::OptOut), "STOP");
        assert_eq!(plan.disposition, Disposition::Silent);
        assert!(plan.reply.is_none());
    }

    #[test]
    fn human_request_hands_over_with_reason() {
        let plan = run(&at(ConversationStatus::Qualifying), "can I speak to a human");
        assert_eq!(plan.conversation.status, ConversationStatus::NeedsArtistReply);
        assert_eq!(plan.conversation.handover_reason.as_deref(), Some("human_request"));
        assert_eq!(plan.conversation.handover_last_hold_reply_at, Some(now()));
        assert!(plan.handover);
    }

    #[test]
    fn refund_takes_precedence_over_human_request() {
        let plan = run(&at(ConversationStatus::AwaitingDeposit), "refund please, human");
        assert_eq!(plan.conversation.handover_reason.as_deref(), Some("refund_request"));
        assert_eq!(plan.reply.as_deref(), Some(replies::REFUND_ACK));
    }
}
