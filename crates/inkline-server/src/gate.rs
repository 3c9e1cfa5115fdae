use chrono::{DateTime, Utc};
use inkline_contracts::{Conversation, InboundEvent};

use crate::store::StoreBackend;

#[derive(Debug)]
pub enum GateDecision {
    Admit(Conversation),
    Duplicate,
    OutOfOrder(Conversation),
}

/// Idempotency and ordering check for one inbound event.
///
/// The ledger lookup here is the fast path; the unique insert made when the
/// turn commits is what actually rejects a concurrent duplicate. An event is
/// out of order only when strictly older than the last admitted inbound.
pub fn admit(
    store: &mut StoreBackend,
    event: &InboundEvent,
    external_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<GateDecision, String> {
    if let Some(message_id) = event.external_message_id.as_deref() {
        if store.processed_exists(&event.provider, message_id)? {
            return Ok(GateDecision::Duplicate);
        }
    }

    let conversation = store.get_or_create_conversation(&event.conversation_identity, now)?;
    if let Some(last) = conversation.last_inbound_at {
        if external_ts < last {
            return Ok(GateDecision::OutOfOrder(conversation));
        }
    }
    Ok(GateDecision::Admit(conversation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TurnCommit};
    use chrono::{Duration, TimeZone};
    use inkline_contracts::ProcessedEvent;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    fn event(id: Option<&str>) -> InboundEvent {
        InboundEvent {
            provider: "sms".to_string(),
            external_message_id: id.map(str::to_string),
            external_timestamp: t0().to_rfc3339(),
            conversation_identity: "+447700900005".to_string(),
            text: "hi".to_string(),
            has_media: false,
        }
    }

    fn store_with_inbound_at(at: DateTime<Utc>) -> StoreBackend {
        let mut store = StoreBackend::Memory(MemoryStore::default());
        let read = store.get_or_create_conversation("+447700900005", t0()).unwrap();
        let mut next = read.clone();
        next.last_inbound_at = Some(at);
        store
            .commit_turn(TurnCommit {
                expected_step: read.step,
                expected_revision: read.revision,
                conversation: &next,
                processed: Some(ProcessedEvent {
                    provider: "sms".to_string(),
                    external_message_id: "m1".to_string(),
                    conversation_id: Some(read.id.clone()),
                    processed_at: t0(),
                }),
                answer: None,
                inbound: None,
                outbound: None,
                at: t0(),
            })
            .unwrap();
        store
    }

    #[test]
    fn first_sight_creates_new_conversation() {
        let mut store = StoreBackend::Memory(MemoryStore::default());
        match admit(&mut store, &event(Some("m1")), t0(), t0()).unwrap() {
            GateDecision::Admit(c) => {
                assert_eq!(c.status, inkline_contracts::ConversationStatus::New);
                assert_eq!(c.step, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn processed_message_id_is_duplicate() {
        let mut store = store_with_inbound_at(t0());
        assert!(matches!(
            admit(&mut store, &event(Some("m1")), t0(), t0()).unwrap(),
            GateDecision::Duplicate
        ));
    }

    #[test]
    fn strictly_older_is_out_of_order_and_equal_is_admitted() {
        let mut store = store_with_inbound_at(t0());
        assert!(matches!(
            admit(&mut store, &event(Some("m2")), t0() - Duration::seconds(1), t0()).unwrap(),
            GateDecision::OutOfOrder(_)
        ));
        assert!(matches!(
            admit(&mut store, &event(Some("m3")), t0(), t0()).unwrap(),
            GateDecision::Admit(_)
        ));
    }

    #[test]
    fn missing_message_id_skips_ledger() {
        let mut store = store_with_inbound_at(t0());
        assert!(matches!(
            admit(&mut store, &event(None), t0(), t0()).unwrap(),
            GateDecision::Admit(_)
        ));
    }
}
