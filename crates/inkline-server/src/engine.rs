use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inkline_config::Config;
use inkline_contracts::{
    Admission, Answer, Conversation, ConversationStatus, Disposition, HandoverPacket, InboundEvent,
    OfferedSlot, OutcomeRecord, ProcessedEvent,
};
use inkline_kernel::{
    build_handover_packet, dispatch, parse_rfc3339, replies, repair, state, EngineSettings,
    IllegalTransition, PricingSettings, TourSettings, TourStop, Turn, TurnPlan,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::audit::{AuditJsonl, AuditRecord};
use crate::gate::{self, GateDecision};
use crate::outbound::{Outbound, SendError};
use crate::store::{CommitOutcome, MemoryStore, SqliteStore, StoreBackend, TurnCommit};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("outbound send failed: {0}")]
    Send(#[from] SendError),
    #[error("store error: {0}")]
    Store(String),
    #[error("conversation {0} kept changing underneath this turn")]
    Contention(String),
    #[error("conversation {0} not found")]
    NotFound(String),
}

/// Builds the read-only settings shared by every turn.
pub fn engine_settings(cfg: &Config) -> EngineSettings {
    let mut settings = EngineSettings::new(cfg.questions.clone());
    settings.max_parse_failures = cfg.engine.max_parse_failures;
    settings.hold_cooldown_hours = cfg.engine.hold_cooldown_hours;
    settings.slot_tolerance_minutes = cfg.engine.slot_tolerance_minutes;
    settings.bundle_amount_threshold = cfg.engine.bundle_amount_threshold;
    settings.recent_message_tail = cfg.engine.recent_message_tail;
    settings.tour = cfg.tour.as_ref().map(|t| TourSettings {
        home_city: t.home_city.clone(),
        stops: t
            .stops
            .iter()
            .map(|s| TourStop {
                city: s.city.clone(),
                dates: s.dates.clone(),
            })
            .collect(),
    });
    settings.pricing = cfg.pricing.as_ref().map(|p| PricingSettings {
        rate_per_cm2_minor: p.rate_per_cm2_minor,
        minimum_minor: p.minimum_minor,
        spread_percent: p.spread_percent,
        currency: p.currency.clone(),
    });
    settings
}

#[derive(Clone)]
pub struct Engine {
    settings: Arc<EngineSettings>,
    store: Arc<Mutex<StoreBackend>>,
    outbound: Arc<dyn Outbound>,
    audit: Arc<AuditJsonl>,
    send_timeout: Duration,
    max_redispatch: usize,
}

impl Engine {
    pub async fn new(cfg: &Config, outbound: Arc<dyn Outbound>) -> Result<Self, String> {
        let store = if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .clone()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            StoreBackend::Sqlite(SqliteStore::new(&sqlite_path)?)
        } else {
            StoreBackend::Memory(MemoryStore::default())
        };
        let audit = AuditJsonl::new(
            &cfg.audit.jsonl_path,
            cfg.store.sqlite_path.as_deref(),
            cfg.audit.immutable_mirror_path.as_deref(),
        )
        .await?;
        Ok(Self {
            settings: Arc::new(engine_settings(cfg)),
            store: Arc::new(Mutex::new(store)),
            outbound,
            audit: Arc::new(audit),
            send_timeout: Duration::from_millis(cfg.outbound.timeout_ms),
            max_redispatch: cfg.engine.max_redispatch,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn conversation(&self, id: &str) -> Result<Option<Conversation>, EngineError> {
        let store = self.store.lock().await;
        store.get_conversation(id).map_err(EngineError::Store)
    }

    pub async fn answers(&self, id: &str) -> Result<Vec<Answer>, EngineError> {
        let store = self.store.lock().await;
        store.answers_for(id).map_err(EngineError::Store)
    }

    /// Standalone persisted step compare-and-set.
    pub async fn advance_step_if_at(
        &self,
        id: &str,
        expected_step: u32,
    ) -> Result<(bool, Conversation), EngineError> {
        let mut store = self.store.lock().await;
        if store.get_conversation(id).map_err(EngineError::Store)?.is_none() {
            return Err(EngineError::NotFound(id.to_string()));
        }
        store
            .advance_step_if_at(id, expected_step)
            .map_err(EngineError::Store)
    }

    /// Runs one inbound event through the gate, the dispatcher and the
    /// outbound channel, then commits the turn.
    ///
    /// The reply is sent before the commit. A turn that then loses the
    /// `(step, revision)` compare-and-set has already delivered its reply;
    /// it is re-dispatched on the fresh state (at most `max_redispatch`
    /// times, then `Contention`) and that re-dispatch can send a second
    /// reply. The ledger row, answer and step advance are still written once.
    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<OutcomeRecord, EngineError> {
        validate_event(&event)?;
        let external_ts = parse_rfc3339(&event.external_timestamp).ok_or_else(|| {
            EngineError::Validation("external_timestamp must be RFC3339".to_string())
        })?;
        let correlation_id = correlation_id(&event);

        let mut redispatches = 0usize;
        loop {
            let now = Utc::now();
            let (decision, answers) = {
                let mut store = self.store.lock().await;
                let decision =
                    gate::admit(&mut store, &event, external_ts, now).map_err(EngineError::Store)?;
                let answers = match &decision {
                    GateDecision::Admit(c) => store.answers_for(&c.id).map_err(EngineError::Store)?,
                    _ => Vec::new(),
                };
                (decision, answers)
            };

            let current = match decision {
                GateDecision::Duplicate => {
                    tracing::info!(correlation_id = %correlation_id, "duplicate inbound event");
                    return Ok(self
                        .record(
                            &event.conversation_identity,
                            &correlation_id,
                            skipped_outcome(Admission::Duplicate, &event.conversation_identity, None),
                        )
                        .await);
                }
                GateDecision::OutOfOrder(conversation) => {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        conversation_id = %conversation.id,
                        "out-of-order inbound event"
                    );
                    return Ok(self
                        .record(
                            &event.conversation_identity,
                            &correlation_id,
                            skipped_outcome(
                                Admission::OutOfOrder,
                                &conversation.id,
                                Some(&conversation),
                            ),
                        )
                        .await);
                }
                GateDecision::Admit(conversation) => conversation,
            };

            let turn = Turn {
                conversation: &current,
                answers: &answers,
                text: &event.text,
                has_media: event.has_media,
                provider: &event.provider,
                message_id: event.external_message_id.as_deref(),
                now,
                settings: &self.settings,
            };
            let mut plan = dispatch(&turn)?;
            plan.conversation.last_inbound_at = Some(
                current
                    .last_inbound_at
                    .map_or(external_ts, |last| last.max(external_ts)),
            );

            if let Some(text) = plan.reply.as_deref() {
                self.send(&current.id, text).await?;
                plan.conversation.last_outbound_at = Some(now);
            }

            let inbound_text = transcript_text(&event);
            let outcome = {
                let mut store = self.store.lock().await;
                store
                    .commit_turn(TurnCommit {
                        expected_step: current.step,
                        expected_revision: current.revision,
                        conversation: &plan.conversation,
                        processed: event.external_message_id.as_ref().map(|id| ProcessedEvent {
                            provider: event.provider.clone(),
                            external_message_id: id.clone(),
                            conversation_id: Some(current.id.clone()),
                            processed_at: now,
                        }),
                        answer: plan.answer.as_ref(),
                        inbound: Some((inbound_text.as_str(), external_ts)),
                        outbound: plan.reply.as_deref(),
                        at: now,
                    })
                    .map_err(EngineError::Store)?
            };

            match outcome {
                CommitOutcome::Committed(conversation) => {
                    let outcome = self.committed_outcome(conversation, &plan, now).await?;
                    return Ok(self.record(&current.id, &correlation_id, outcome).await);
                }
                CommitOutcome::Duplicate => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        conversation_id = %current.id,
                        sent = plan.reply.is_some(),
                        "concurrent delivery of the same event lost the ledger race"
                    );
                    return Ok(self
                        .record(
                            &current.id,
                            &correlation_id,
                            skipped_outcome(Admission::Duplicate, &current.id, None),
                        )
                        .await);
                }
                CommitOutcome::Conflict => {
                    redispatches += 1;
                    tracing::warn!(
                        conversation_id = %current.id,
                        step = current.step,
                        revision = current.revision,
                        redispatches,
                        "step compare-and-set lost, re-dispatching"
                    );
                    if let Some(text) = plan.reply.as_deref() {
                        tracing::warn!(
                            conversation_id = %current.id,
                            correlation_id = %correlation_id,
                            chars = text.chars().count(),
                            "reply from the losing turn was already delivered and is not recorded; \
                             the re-dispatched turn may send another"
                        );
                    }
                    if redispatches > self.max_redispatch {
                        return Err(EngineError::Contention(current.id.clone()));
                    }
                }
            }
        }
    }

    /// Operator-driven status change, e.g. approving a request or handing
    /// the conversation back to the bot.
    pub async fn operator_transition(
        &self,
        id: &str,
        target: ConversationStatus,
        reason: Option<&str>,
    ) -> Result<Conversation, EngineError> {
        for _ in 0..=self.max_redispatch {
            let current = self.load(id).await?;
            let now = Utc::now();
            let mut next = current.clone();
            if current.status == ConversationStatus::NeedsArtistReply {
                repair::on_resume(&mut next);
            }
            state::transition(&mut next, target, now, reason)?;
            if target == ConversationStatus::NeedsArtistReply {
                next.handover_last_hold_reply_at = Some(now);
            }

            let outcome = {
                let mut store = self.store.lock().await;
                store
                    .commit_turn(TurnCommit {
                        expected_step: current.step,
                        expected_revision: current.revision,
                        conversation: &next,
                        processed: None,
                        answer: None,
                        inbound: None,
                        outbound: None,
                        at: now,
                    })
                    .map_err(EngineError::Store)?
            };
            if let CommitOutcome::Committed(conversation) = outcome {
                tracing::info!(
                    conversation_id = %id,
                    from = %current.status,
                    to = %target,
                    "operator transition"
                );
                self.audit
                    .append(
                        AuditRecord::new(id, "operator", "operator_transition", "committed")
                            .with_state(
                                Some(Disposition::OperatorTransition),
                                Some(conversation.status),
                                Some(conversation.step),
                            ),
                    )
                    .await;
                return Ok(conversation);
            }
        }
        Err(EngineError::Contention(id.to_string()))
    }

    /// Calendar collaborator entry point: stores the offered appointments,
    /// moves the conversation to `BOOKING_PENDING` and sends the options.
    ///
    /// The options are sent before the commit, so every lost
    /// compare-and-set retry sends them again.
    pub async fn offer_slots(
        &self,
        id: &str,
        slots: Vec<OfferedSlot>,
    ) -> Result<Conversation, EngineError> {
        if slots.is_empty() {
            return Err(EngineError::Validation("at least one slot is required".to_string()));
        }
        let text = replies::slot_options(&slots);
        for _ in 0..=self.max_redispatch {
            let current = self.load(id).await?;
            let now = Utc::now();
            let mut next = current.clone();
            if current.status != ConversationStatus::BookingPending {
                state::transition(&mut next, ConversationStatus::BookingPending, now, None)?;
            }
            next.offered_slots = slots.clone();

            self.send(id, &text).await?;
            next.last_outbound_at = Some(now);

            let outcome = {
                let mut store = self.store.lock().await;
                store
                    .commit_turn(TurnCommit {
                        expected_step: current.step,
                        expected_revision: current.revision,
                        conversation: &next,
                        processed: None,
                        answer: None,
                        inbound: None,
                        outbound: Some(&text),
                        at: now,
                    })
                    .map_err(EngineError::Store)?
            };
            if let CommitOutcome::Committed(conversation) = outcome {
                self.audit
                    .append(
                        AuditRecord::new(id, "calendar", "offer_slots", "committed").with_state(
                            Some(Disposition::SlotsOffered),
                            Some(conversation.status),
                            Some(conversation.step),
                        ),
                    )
                    .await;
                return Ok(conversation);
            }
            tracing::warn!(
                conversation_id = %id,
                slots = slots.len(),
                "slot offer lost compare-and-set after the options were sent; retrying sends them again"
            );
        }
        Err(EngineError::Contention(id.to_string()))
    }

    pub async fn handover_packet(&self, id: &str) -> Result<HandoverPacket, EngineError> {
        let conversation = self.load(id).await?;
        self.packet_for(&conversation, Utc::now()).await
    }

    async fn load(&self, id: &str) -> Result<Conversation, EngineError> {
        let store = self.store.lock().await;
        store
            .get_conversation(id)
            .map_err(EngineError::Store)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn packet_for(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Result<HandoverPacket, EngineError> {
        let (answers, messages) = {
            let store = self.store.lock().await;
            (
                store.answers_for(&conversation.id).map_err(EngineError::Store)?,
                store.messages_for(&conversation.id).map_err(EngineError::Store)?,
            )
        };
        build_handover_packet(
            conversation,
            &self.settings.questions,
            &answers,
            &messages,
            self.settings.pricing.as_ref(),
            self.settings.recent_message_tail,
            now,
        )
        .map_err(EngineError::Store)
    }

    async fn send(&self, identity: &str, text: &str) -> Result<(), EngineError> {
        let result = tokio::time::timeout(self.send_timeout, self.outbound.send(identity, text))
            .await
            .unwrap_or(Err(SendError::Timeout));
        match result {
            Ok(ack) => {
                tracing::debug!(
                    conversation_id = %identity,
                    provider_message_id = ?ack.provider_message_id,
                    "reply sent"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %identity,
                    error = %e,
                    "reply send failed, nothing committed"
                );
                Err(EngineError::Send(e))
            }
        }
    }

    async fn committed_outcome(
        &self,
        conversation: Conversation,
        plan: &TurnPlan,
        now: DateTime<Utc>,
    ) -> Result<OutcomeRecord, EngineError> {
        let handover = if plan.handover {
            let packet = self.packet_for(&conversation, now).await?;
            tracing::info!(
                conversation_id = %conversation.id,
                reason = ?packet.reason,
                digest = %packet.digest,
                "handover packet built"
            );
            Some(packet)
        } else {
            None
        };
        tracing::info!(
            conversation_id = %conversation.id,
            status = %conversation.status,
            step = conversation.step,
            disposition = plan.disposition.as_str(),
            "turn committed"
        );
        Ok(OutcomeRecord {
            admission: Admission::Admit,
            conversation_id: Some(conversation.id.clone()),
            conversation_status: Some(conversation.status),
            step: Some(conversation.step),
            sent_text: plan.reply.clone(),
            disposition: Some(plan.disposition),
            handover,
        })
    }

    async fn record(
        &self,
        conversation_id: &str,
        correlation_id: &str,
        outcome: OutcomeRecord,
    ) -> OutcomeRecord {
        let result = match outcome.admission {
            Admission::Admit => "admit",
            Admission::Duplicate => "duplicate",
            Admission::OutOfOrder => "out_of_order",
        };
        self.audit
            .append(
                AuditRecord::new(conversation_id, correlation_id, "inbound", result).with_state(
                    outcome.disposition,
                    outcome.conversation_status,
                    outcome.step,
                ),
            )
            .await;
        outcome
    }
}

fn validate_event(event: &InboundEvent) -> Result<(), EngineError> {
    if event.provider.trim().is_empty() {
        return Err(EngineError::Validation("provider is required".to_string()));
    }
    if event.conversation_identity.trim().is_empty() {
        return Err(EngineError::Validation(
            "conversation_identity is required".to_string(),
        ));
    }
    if let Some(id) = &event.external_message_id {
        if id.trim().is_empty() {
            return Err(EngineError::Validation(
                "external_message_id must not be empty when present".to_string(),
            ));
        }
    }
    Ok(())
}

fn correlation_id(event: &InboundEvent) -> String {
    match &event.external_message_id {
        Some(id) => format!("{}:{}", event.provider, id),
        None => format!("{}:-", event.provider),
    }
}

fn transcript_text(event: &InboundEvent) -> String {
    match (event.text.trim().is_empty(), event.has_media) {
        (true, true) => "[media]".to_string(),
        _ => event.text.clone(),
    }
}

fn skipped_outcome(
    admission: Admission,
    conversation_id: &str,
    conversation: Option<&Conversation>,
) -> OutcomeRecord {
    OutcomeRecord {
        admission,
        conversation_id: Some(conversation_id.to_string()),
        conversation_status: conversation.map(|c| c.status),
        step: conversation.map(|c| c.step),
        sent_text: None,
        disposition: None,
        handover: None,
    }
}
