//! Per-field parse failure counters and the three-strike escalation rule.

use inkline_contracts::Conversation;

pub const DEFAULT_MAX_PARSE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairDecision {
    /// Re-ask; `attempt` is the new failure count for the field.
    SoftRepair { attempt: u32 },
    /// The field hit the threshold; hand the conversation to a human.
    Escalate { attempts: u32 },
}

pub fn on_parse_failure(conversation: &mut Conversation, field: &str, threshold: u32) -> RepairDecision {
    let count = conversation
        .parse_failure_counts
        .entry(field.to_string())
        .or_insert(0);
    *count += 1;
    let attempts = *count;
    if attempts >= threshold.max(1) {
        tracing::info!(
            conversation_id = %conversation.id,
            field,
            attempts,
            "parse failures reached escalation threshold"
        );
        RepairDecision::Escalate { attempts }
    } else {
        RepairDecision::SoftRepair { attempt: attempts }
    }
}

pub fn on_parse_success(conversation: &mut Conversation, field: &str) {
    conversation.parse_failure_counts.remove(field);
}

/// Called when a human or a resume keyword hands the conversation back to
/// the bot.
pub fn on_resume(conversation: &mut Conversation) {
    conversation.parse_failure_counts.clear();
}
