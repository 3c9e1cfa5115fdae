use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    New,
    Qualifying,
    PendingApproval,
    AwaitingDeposit,
    DepositPaid,
    BookingPending,
    CollectingTimeWindows,
    TourConversionOffered,
    Waitlisted,
    NeedsArtistReply,
    NeedsFollowUp,
    Booked,
    Rejected,
    Abandoned,
    Stale,
    #[serde(rename = "OPTOUT")]
    OptOut,
}

impl ConversationStatus {
    pub const ALL: [ConversationStatus; 16] = [
        ConversationStatus::New,
        ConversationStatus::Qualifying,
        ConversationStatus::PendingApproval,
        ConversationStatus::AwaitingDeposit,
        ConversationStatus::DepositPaid,
        ConversationStatus::BookingPending,
        ConversationStatus::CollectingTimeWindows,
        ConversationStatus::TourConversionOffered,
        ConversationStatus::Waitlisted,
        ConversationStatus::NeedsArtistReply,
        ConversationStatus::NeedsFollowUp,
        ConversationStatus::Booked,
        ConversationStatus::Rejected,
        ConversationStatus::Abandoned,
        ConversationStatus::Stale,
        ConversationStatus::OptOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::New => "NEW",
            ConversationStatus::Qualifying => "QUALIFYING",
            ConversationStatus::PendingApproval => "PENDING_APPROVAL",
            ConversationStatus::AwaitingDeposit => "AWAITING_DEPOSIT",
            ConversationStatus::DepositPaid => "DEPOSIT_PAID",
            ConversationStatus::BookingPending => "BOOKING_PENDING",
            ConversationStatus::CollectingTimeWindows => "COLLECTING_TIME_WINDOWS",
            ConversationStatus::TourConversionOffered => "TOUR_CONVERSION_OFFERED",
            ConversationStatus::Waitlisted => "WAITLISTED",
            ConversationStatus::NeedsArtistReply => "NEEDS_ARTIST_REPLY",
            ConversationStatus::NeedsFollowUp => "NEEDS_FOLLOW_UP",
            ConversationStatus::Booked => "BOOKED",
            ConversationStatus::Rejected => "REJECTED",
            ConversationStatus::Abandoned => "ABANDONED",
            ConversationStatus::Stale => "STALE",
            ConversationStatus::OptOut => "OPTOUT",
        }
    }

}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per external identity. The store only ever writes it through a
/// turn commit conditioned on the `step` and `revision` the writer read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub status: ConversationStatus,
    pub step: u32,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_inbound_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_outbound_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parse_failure_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub handover_last_hold_reply_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub handover_reason: Option<String>,
    #[serde(default)]
    pub handover_return_status: Option<ConversationStatus>,
    #[serde(default)]
    pub qualifying_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approval_pending_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deposit_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deposit_paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub booking_pending_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub booked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub handover_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opted_out_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offered_slots: Vec<OfferedSlot>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Conversation {
    pub fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            status: ConversationStatus::New,
            step: 0,
            revision: 0,
            created_at: now,
            last_inbound_at: None,
            last_outbound_at: None,
            parse_failure_counts: BTreeMap::new(),
            handover_last_hold_reply_at: None,
            handover_reason: None,
            handover_return_status: None,
            qualifying_started_at: None,
            approval_pending_at: None,
            deposit_requested_at: None,
            deposit_paid_at: None,
            booking_pending_at: None,
            booked_at: None,
            handover_at: None,
            opted_out_at: None,
            offered_slots: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn parse_failures(&self, field: &str) -> u32 {
        self.parse_failure_counts.get(field).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferedSlot {
    pub start: NaiveDateTime,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub conversation_id: String,
    pub seq: u64,
    pub question_key: String,
    pub answer_text: String,
    #[serde(default)]
    pub normalized: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEvent {
    pub provider: String,
    pub external_message_id: String,
    pub conversation_id: Option<String>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub conversation_id: String,
    pub seq: u64,
    pub direction: Direction,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    Text,
    Dimensions,
    Amount,
    Place,
    Media,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Question {
    pub key: String,
    pub prompt: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub kind: QuestionKind,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundEvent {
    pub provider: String,
    #[serde(default)]
    pub external_message_id: Option<String>,
    pub external_timestamp: String,
    pub conversation_identity: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub has_media: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Admit,
    Duplicate,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Greeted,
    Advanced,
    Completed,
    Repaired,
    Escalated,
    HandedOver,
    Held,
    Silent,
    Acknowledged,
    OptedOut,
    Restarted,
    Resumed,
    Reengaged,
    TourOffered,
    TourAccepted,
    Waitlisted,
    SlotsOffered,
    SlotBooked,
    WindowsRequested,
    WindowsCollected,
    OperatorTransition,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Greeted => "greeted",
            Disposition::Advanced => "advanced",
            Disposition::Completed => "completed",
            Disposition::Repaired => "repaired",
            Disposition::Escalated => "escalated",
            Disposition::HandedOver => "handed_over",
            Disposition::Held => "held",
            Disposition::Silent => "silent",
            Disposition::Acknowledged => "acknowledged",
            Disposition::OptedOut => "opted_out",
            Disposition::Restarted => "restarted",
            Disposition::Resumed => "resumed",
            Disposition::Reengaged => "reengaged",
            Disposition::TourOffered => "tour_offered",
            Disposition::TourAccepted => "tour_accepted",
            Disposition::Waitlisted => "waitlisted",
            Disposition::SlotsOffered => "slots_offered",
            Disposition::SlotBooked => "slot_booked",
            Disposition::WindowsRequested => "windows_requested",
            Disposition::WindowsCollected => "windows_collected",
            Disposition::OperatorTransition => "operator_transition",
        }
    }
}

/// Result of one inbound event, returned to the transport and appended to
/// the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub admission: Admission,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_status: Option<ConversationStatus>,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub sent_text: Option<String>,
    #[serde(default)]
    pub disposition: Option<Disposition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handover: Option<HandoverPacket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketAnswer {
    pub question_key: String,
    pub answer_text: String,
    #[serde(default)]
    pub normalized: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceEstimate {
    pub low_minor: i64,
    pub high_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TourContext {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub dates: Option<String>,
    pub accepted: Option<bool>,
    pub waitlisted: bool,
}

/// Read-only snapshot handed to a human when the bot steps back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoverPacket {
    pub conversation_id: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub answers: Vec<PacketAnswer>,
    pub parse_failures: BTreeMap<String, u32>,
    #[serde(default)]
    pub price_estimate: Option<PriceEstimate>,
    #[serde(default)]
    pub tour: Option<TourContext>,
    pub recent_messages: Vec<Message>,
    pub generated_at: DateTime<Utc>,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_matches_serde_wire_name() {
        for status in ConversationStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(serde_json::from_str::<ConversationStatus>("\"SOMETHING_ELSE\"").is_err());
    }

    #[test]
    fn error_response_serializes_code_and_message() {
        let body = ErrorResponse {
            error: ErrorBody {
                code: "not_found".to_string(),
                message: "conversation x not found".to_string(),
                details: None,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"]["code"], "not_found");
        assert_eq!(value["error"]["message"], "conversation x not found");
    }

    #[test]
    fn status_serializes_as_wire_name() {
        let json = serde_json::to_string(&ConversationStatus::NeedsArtistReply).unwrap();
        assert_eq!(json, "\"NEEDS_ARTIST_REPLY\"");
        let json = serde_json::to_string(&ConversationStatus::OptOut).unwrap();
        assert_eq!(json, "\"OPTOUT\"");
    }

    #[test]
    fn inbound_event_defaults_optional_fields() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"provider":"whatsapp","external_timestamp":"2026-02-14T00:00:00Z","conversation_identity":"+447700900001"}"#,
        )
        .unwrap();
        assert!(event.external_message_id.is_none());
        assert!(event.text.is_empty());
        assert!(!event.has_media);
    }

    #[test]
    fn question_defaults_to_required_text() {
        let q: Question = serde_json::from_str(r#"{"key":"idea","prompt":"What's the idea?"}"#).unwrap();
        assert!(q.required);
        assert_eq!(q.kind, QuestionKind::Text);
    }
}
