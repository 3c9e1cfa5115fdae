//! Conversation status table and the guarded operations that move a
//! conversation between statuses or along the question list.

use chrono::{DateTime, Utc};
use inkline_contracts::{Conversation, ConversationStatus};
use thiserror::Error;

use ConversationStatus::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: ConversationStatus,
    pub to: ConversationStatus,
}

/// Allowed destinations per source status. `OPTOUT -> NEW` is deliberately
/// absent; it only happens through [`restart`].
pub fn allowed_targets(from: ConversationStatus) -> &'static [ConversationStatus] {
    match from {
        New => &[Qualifying, NeedsArtistReply, OptOut, Abandoned],
        Qualifying => &[
            PendingApproval,
            TourConversionOffered,
            Waitlisted,
            NeedsArtistReply,
            Rejected,
            Abandoned,
            Stale,
            OptOut,
        ],
        PendingApproval => &[
            AwaitingDeposit,
            Rejected,
            NeedsArtistReply,
            NeedsFollowUp,
            Stale,
            OptOut,
        ],
        AwaitingDeposit => &[DepositPaid, NeedsArtistReply, Abandoned, Stale, OptOut],
        DepositPaid => &[BookingPending, NeedsArtistReply, OptOut],
        BookingPending => &[
            Booked,
            CollectingTimeWindows,
            NeedsArtistReply,
            Stale,
            OptOut,
        ],
        CollectingTimeWindows => &[
            BookingPending,
            NeedsFollowUp,
            NeedsArtistReply,
            Stale,
            OptOut,
        ],
        TourConversionOffered => &[Qualifying, Waitlisted, NeedsArtistReply, Abandoned, OptOut],
        Waitlisted => &[Qualifying, NeedsArtistReply, Abandoned, OptOut],
        NeedsArtistReply => &[
            Qualifying,
            PendingApproval,
            AwaitingDeposit,
            BookingPending,
            TourConversionOffered,
            NeedsFollowUp,
            Rejected,
            Abandoned,
            OptOut,
        ],
        NeedsFollowUp => &[
            Qualifying,
            BookingPending,
            NeedsArtistReply,
            Abandoned,
            Stale,
            OptOut,
        ],
        Abandoned => &[Qualifying, OptOut],
        Stale => &[Qualifying, Abandoned, OptOut],
        Booked | Rejected | OptOut => &[],
    }
}

pub fn can_transition(from: ConversationStatus, to: ConversationStatus) -> bool {
    allowed_targets(from).contains(&to)
}

pub fn is_terminal(status: ConversationStatus) -> bool {
    allowed_targets(status).is_empty()
}

/// Moves `conversation` to `target` or leaves it untouched and returns
/// [`IllegalTransition`].
pub fn transition(
    conversation: &mut Conversation,
    target: ConversationStatus,
    now: DateTime<Utc>,
    reason: Option<&str>,
) -> Result<(), IllegalTransition> {
    let from = conversation.status;
    if !can_transition(from, target) {
        return Err(IllegalTransition { from, to: target });
    }

    if from == NeedsArtistReply {
        conversation.handover_reason = None;
        conversation.handover_return_status = None;
    }
    conversation.status = target;
    stamp_entered_at(conversation, target, now);
    if target == NeedsArtistReply {
        conversation.handover_reason = Some(reason.unwrap_or("unspecified").to_string());
        conversation.handover_return_status = Some(from);
    }

    tracing::debug!(
        conversation_id = %conversation.id,
        from = %from,
        to = %target,
        "status transition"
    );
    Ok(())
}

fn stamp_entered_at(conversation: &mut Conversation, target: ConversationStatus, now: DateTime<Utc>) {
    let slot = match target {
        Qualifying => &mut conversation.qualifying_started_at,
        PendingApproval => &mut conversation.approval_pending_at,
        AwaitingDeposit => &mut conversation.deposit_requested_at,
        DepositPaid => &mut conversation.deposit_paid_at,
        BookingPending => &mut conversation.booking_pending_at,
        Booked => &mut conversation.booked_at,
        NeedsArtistReply => &mut conversation.handover_at,
        OptOut => &mut conversation.opted_out_at,
        _ => return,
    };
    *slot = Some(now);
}

/// Re-entry after an opt-back-in keyword. Only valid from `OPTOUT`; resets
/// the step and clears repair counters. Answers stay on record.
pub fn restart(conversation: &mut Conversation, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    if conversation.status != OptOut {
        return Err(IllegalTransition {
            from: conversation.status,
            to: New,
        });
    }
    conversation.status = New;
    conversation.step = 0;
    conversation.parse_failure_counts.clear();
    conversation.handover_reason = None;
    conversation.handover_return_status = None;
    conversation.handover_last_hold_reply_at = None;
    conversation.opted_out_at = None;
    tracing::info!(conversation_id = %conversation.id, at = %now, "conversation restarted");
    Ok(())
}

/// In-memory half of the compare-and-set: bumps `step` only when it still
/// equals `expected_step`.
pub fn advance_step_if_at(conversation: &mut Conversation, expected_step: u32) -> bool {
    if conversation.step != expected_step {
        return false;
    }
    conversation.step += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn conversation(status: ConversationStatus) -> Conversation {
        let mut c = Conversation::new("+447700900001", now());
        c.status = status;
        c
    }

    #[test]
    fn booked_rejected_and_optout_are_terminal() {
        for status in [Booked, Rejected, OptOut] {
            assert!(is_terminal(status));
            for target in ConversationStatus::ALL {
                let mut c = conversation(status);
                assert!(transition(&mut c, target, now(), None).is_err());
                assert_eq!(c.status, status);
            }
        }
    }

    #[test]
    fn optout_reachable_from_every_non_terminal_status() {
        for status in ConversationStatus::ALL {
            if is_terminal(status) {
                continue;
            }
            assert!(can_transition(status, OptOut), "{status} cannot opt out");
        }
    }

    #[test]
    fn illegal_transition_leaves_conversation_unchanged() {
        for from in ConversationStatus::ALL {
            for to in ConversationStatus::ALL {
                if can_transition(from, to) {
                    continue;
                }
                let mut c = conversation(from);
                c.step = 4;
                let before = c.clone();
                let err = transition(&mut c, to, now(), Some("x")).unwrap_err();
                assert_eq!(err, IllegalTransition { from, to });
                assert_eq!(c, before);
            }
        }
    }

    #[test]
    fn entering_handover_records_reason_and_return_status() {
        let mut c = conversation(Qualifying);
        transition(&mut c, NeedsArtistReply, now(), Some("parse_failure:dimensions")).unwrap();
        assert_eq!(c.status, NeedsArtistReply);
        assert_eq!(c.handover_reason.as_deref(), Some("parse_failure:dimensions"));
        assert_eq!(c.handover_return_status, Some(Qualifying));
        assert_eq!(c.handover_at, Some(now()));

        transition(&mut c, Qualifying, now(), None).unwrap();
        assert!(c.handover_reason.is_none());
        assert!(c.handover_return_status.is_none());
    }

    #[test]
    fn entering_status_stamps_timestamp() {
        let mut c = conversation(New);
        transition(&mut c, Qualifying, now(), None).unwrap();
        assert_eq!(c.qualifying_started_at, Some(now()));
        transition(&mut c, PendingApproval, now(), None).unwrap();
        assert_eq!(c.approval_pending_at, Some(now()));
    }

    #[test]
    fn restart_only_from_optout_and_resets_step() {
        let mut c = conversation(Qualifying);
        c.step = 3;
        assert!(restart(&mut c, now()).is_err());
        assert_eq!(c.step, 3);

        let mut c = conversation(OptOut);
        c.step = 3;
        c.parse_failure_counts.insert("budget".to_string(), 2);
        restart(&mut c, now()).unwrap();
        assert_eq!(c.status, New);
        assert_eq!(c.step, 0);
        assert!(c.parse_failure_counts.is_empty());
    }

    #[test]
    fn optout_to_new_is_not_a_table_edge() {
        let mut c = conversation(OptOut);
        assert!(transition(&mut c, New, now(), None).is_err());
    }

    #[test]
    fn advance_step_only_from_expected_value() {
        let mut c = conversation(Qualifying);
        c.step = 2;
        assert!(!advance_step_if_at(&mut c, 1));
        assert_eq!(c.step, 2);
        assert!(advance_step_if_at(&mut c, 2));
        assert_eq!(c.step, 3);
    }
}
