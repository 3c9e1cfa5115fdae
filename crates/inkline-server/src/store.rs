use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inkline_contracts::{Answer, Conversation, Direction, Message, ProcessedEvent};
use inkline_kernel::{parse_rfc3339, NewAnswer};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

/// Everything written by one turn. Applied all-or-nothing.
pub struct TurnCommit<'a> {
    /// `(step, revision)` the handler read; the write is conditioned on both.
    pub expected_step: u32,
    pub expected_revision: u64,
    pub conversation: &'a Conversation,
    pub processed: Option<ProcessedEvent>,
    pub answer: Option<&'a NewAnswer>,
    pub inbound: Option<(&'a str, DateTime<Utc>)>,
    pub outbound: Option<&'a str>,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum CommitOutcome {
    Committed(Conversation),
    /// The `(provider, external_message_id)` pair was already in the ledger.
    Duplicate,
    /// Another writer moved the conversation since it was read.
    Conflict,
}

#[derive(Default)]
pub struct MemoryStore {
    conversations: HashMap<String, Conversation>,
    answers: HashMap<String, Vec<Answer>>,
    messages: HashMap<String, Vec<Message>>,
    processed: HashMap<(String, String), ProcessedEvent>,
    next_seq: u64,
}

pub struct SqliteStore {
    conn: Connection,
}

pub enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl StoreBackend {
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store.conversations.get(id).cloned()),
            StoreBackend::Sqlite(store) => store.get_conversation(id),
        }
    }

    /// Returns the stored conversation, creating it as `NEW` at step 0 on
    /// first sight.
    pub fn get_or_create_conversation(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .conversations
                .entry(id.to_string())
                .or_insert_with(|| Conversation::new(id, now))
                .clone()),
            StoreBackend::Sqlite(store) => store.get_or_create_conversation(id, now),
        }
    }

    pub fn processed_exists(&self, provider: &str, message_id: &str) -> Result<bool, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .processed
                .contains_key(&(provider.to_string(), message_id.to_string()))),
            StoreBackend::Sqlite(store) => store.processed_exists(provider, message_id),
        }
    }

    pub fn answers_for(&self, conversation_id: &str) -> Result<Vec<Answer>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .answers
                .get(conversation_id)
                .cloned()
                .unwrap_or_default()),
            StoreBackend::Sqlite(store) => store.answers_for(conversation_id),
        }
    }

    pub fn messages_for(&self, conversation_id: &str) -> Result<Vec<Message>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_default()),
            StoreBackend::Sqlite(store) => store.messages_for(conversation_id),
        }
    }

    pub fn commit_turn(&mut self, commit: TurnCommit<'_>) -> Result<CommitOutcome, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store.commit_turn(commit)),
            StoreBackend::Sqlite(store) => store.commit_turn(commit),
        }
    }

    /// Persisted compare-and-set: bumps `step` only if it still equals
    /// `expected_step`. Returns whether it moved and the current row.
    pub fn advance_step_if_at(
        &mut self,
        id: &str,
        expected_step: u32,
    ) -> Result<(bool, Conversation), String> {
        match self {
            StoreBackend::Memory(store) => {
                let conversation = store
                    .conversations
                    .get_mut(id)
                    .ok_or_else(|| format!("conversation {id} not found"))?;
                let moved = inkline_kernel::advance_step_if_at(conversation, expected_step);
                if moved {
                    conversation.revision += 1;
                }
                Ok((moved, conversation.clone()))
            }
            StoreBackend::Sqlite(store) => store.advance_step_if_at(id, expected_step),
        }
    }
}

impl MemoryStore {
    fn commit_turn(&mut self, commit: TurnCommit<'_>) -> CommitOutcome {
        let id = commit.conversation.id.clone();
        if let Some(event) = &commit.processed {
            let key = (event.provider.clone(), event.external_message_id.clone());
            if self.processed.contains_key(&key) {
                return CommitOutcome::Duplicate;
            }
        }
        match self.conversations.get(&id) {
            Some(current)
                if current.step == commit.expected_step
                    && current.revision == commit.expected_revision => {}
            _ => return CommitOutcome::Conflict,
        }

        if let Some(event) = commit.processed {
            self.processed.insert(
                (event.provider.clone(), event.external_message_id.clone()),
                event,
            );
        }
        let mut next = commit.conversation.clone();
        next.revision = commit.expected_revision + 1;
        self.conversations.insert(id.clone(), next.clone());

        if let Some(answer) = commit.answer {
            self.next_seq += 1;
            self.answers.entry(id.clone()).or_default().push(Answer {
                conversation_id: id.clone(),
                seq: self.next_seq,
                question_key: answer.question_key.clone(),
                answer_text: answer.answer_text.clone(),
                normalized: answer.normalized.clone(),
                created_at: commit.at,
                media_ref: answer.media_ref.clone(),
            });
        }
        let mut transcript = Vec::new();
        if let Some((text, at)) = commit.inbound {
            transcript.push((Direction::Inbound, text, at));
        }
        if let Some(text) = commit.outbound {
            transcript.push((Direction::Outbound, text, commit.at));
        }
        for (direction, text, at) in transcript {
            self.next_seq += 1;
            self.messages.entry(id.clone()).or_default().push(Message {
                conversation_id: id.clone(),
                seq: self.next_seq,
                direction,
                text: text.to_string(),
                at,
            });
        }
        CommitOutcome::Committed(next)
    }
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                step INTEGER NOT NULL,
                revision INTEGER NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS answers (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                question_key TEXT NOT NULL,
                answer_text TEXT NOT NULL,
                normalized TEXT,
                created_at TEXT NOT NULL,
                media_ref TEXT
            );
            CREATE INDEX IF NOT EXISTS answers_by_conversation ON answers(conversation_id);
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                text TEXT NOT NULL,
                at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages(conversation_id);
            CREATE TABLE IF NOT EXISTS processed_events (
                provider TEXT NOT NULL,
                external_message_id TEXT NOT NULL,
                conversation_id TEXT,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (provider, external_message_id)
            );
            ",
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, String> {
        read_conversation(&self.conn, id)
    }

    fn get_or_create_conversation(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, String> {
        let fresh = Conversation::new(id, now);
        let json = serde_json::to_string(&fresh).map_err(|e| e.to_string())?;
        self.conn
            .execute(
                "
                INSERT OR IGNORE INTO conversations(id, status, step, revision, record_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                params![id, fresh.status.as_str(), fresh.step, fresh.revision as i64, json],
            )
            .map_err(|e| e.to_string())?;
        read_conversation(&self.conn, id)?
            .ok_or_else(|| format!("conversation {id} missing after insert"))
    }

    fn processed_exists(&self, provider: &str, message_id: &str) -> Result<bool, String> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_events WHERE provider = ?1 AND external_message_id = ?2",
                params![provider, message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())?;
        Ok(found.is_some())
    }

    fn answers_for(&self, conversation_id: &str) -> Result<Vec<Answer>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT seq, question_key, answer_text, normalized, created_at, media_ref
                FROM answers WHERE conversation_id = ?1 ORDER BY seq
                ",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(|e| e.to_string())?;

        let mut answers = Vec::new();
        for row in rows {
            let (seq, question_key, answer_text, normalized, created_at, media_ref) =
                row.map_err(|e| e.to_string())?;
            answers.push(Answer {
                conversation_id: conversation_id.to_string(),
                seq: seq as u64,
                question_key,
                answer_text,
                normalized,
                created_at: parse_rfc3339(&created_at)
                    .ok_or_else(|| format!("answer {seq} has invalid created_at"))?,
                media_ref,
            });
        }
        Ok(answers)
    }

    fn messages_for(&self, conversation_id: &str) -> Result<Vec<Message>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, direction, text, at FROM messages WHERE conversation_id = ?1 ORDER BY seq",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| e.to_string())?;

        let mut messages = Vec::new();
        for row in rows {
            let (seq, direction, text, at) = row.map_err(|e| e.to_string())?;
            messages.push(Message {
                conversation_id: conversation_id.to_string(),
                seq: seq as u64,
                direction: if direction == "outbound" {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                },
                text,
                at: parse_rfc3339(&at).ok_or_else(|| format!("message {seq} has invalid at"))?,
            });
        }
        Ok(messages)
    }

    fn commit_turn(&mut self, commit: TurnCommit<'_>) -> Result<CommitOutcome, String> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| e.to_string())?;
        let id = commit.conversation.id.as_str();

        if let Some(event) = &commit.processed {
            let inserted = tx.execute(
                "
                INSERT INTO processed_events(provider, external_message_id, conversation_id, processed_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![
                    event.provider,
                    event.external_message_id,
                    event.conversation_id,
                    event.processed_at.to_rfc3339()
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Ok(CommitOutcome::Duplicate);
                }
                Err(e) => return Err(e.to_string()),
            }
        }

        let mut next = commit.conversation.clone();
        next.revision = commit.expected_revision + 1;
        let json = serde_json::to_string(&next).map_err(|e| e.to_string())?;
        let updated = tx
            .execute(
                "
                UPDATE conversations
                SET status = ?1, step = ?2, revision = ?3, record_json = ?4
                WHERE id = ?5 AND step = ?6 AND revision = ?7
                ",
                params![
                    next.status.as_str(),
                    next.step,
                    next.revision as i64,
                    json,
                    id,
                    commit.expected_step,
                    commit.expected_revision as i64
                ],
            )
            .map_err(|e| e.to_string())?;
        if updated == 0 {
            return Ok(CommitOutcome::Conflict);
        }

        let at = commit.at.to_rfc3339();
        if let Some(answer) = commit.answer {
            tx.execute(
                "
                INSERT INTO answers(conversation_id, question_key, answer_text, normalized, created_at, media_ref)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    id,
                    answer.question_key,
                    answer.answer_text,
                    answer.normalized,
                    at,
                    answer.media_ref
                ],
            )
            .map_err(|e| e.to_string())?;
        }
        if let Some((text, inbound_at)) = commit.inbound {
            tx.execute(
                "INSERT INTO messages(conversation_id, direction, text, at) VALUES (?1, ?2, ?3, ?4)",
                params![id, Direction::Inbound.as_str(), text, inbound_at.to_rfc3339()],
            )
            .map_err(|e| e.to_string())?;
        }
        if let Some(text) = commit.outbound {
            tx.execute(
                "INSERT INTO messages(conversation_id, direction, text, at) VALUES (?1, ?2, ?3, ?4)",
                params![id, Direction::Outbound.as_str(), text, at],
            )
            .map_err(|e| e.to_string())?;
        }

        tx.commit().map_err(|e| e.to_string())?;
        Ok(CommitOutcome::Committed(next))
    }

    fn advance_step_if_at(
        &mut self,
        id: &str,
        expected_step: u32,
    ) -> Result<(bool, Conversation), String> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| e.to_string())?;
        let mut conversation = read_conversation(&tx, id)?
            .ok_or_else(|| format!("conversation {id} not found"))?;
        let read_revision = conversation.revision;
        if !inkline_kernel::advance_step_if_at(&mut conversation, expected_step) {
            return Ok((false, conversation));
        }
        conversation.revision = read_revision + 1;
        let json = serde_json::to_string(&conversation).map_err(|e| e.to_string())?;
        let updated = tx
            .execute(
                "
                UPDATE conversations SET step = ?1, revision = ?2, record_json = ?3
                WHERE id = ?4 AND step = ?5
                ",
                params![
                    conversation.step,
                    conversation.revision as i64,
                    json,
                    id,
                    expected_step
                ],
            )
            .map_err(|e| e.to_string())?;
        if updated == 0 {
            drop(tx);
            let current = read_conversation(&self.conn, id)?
                .ok_or_else(|| format!("conversation {id} not found"))?;
            return Ok((false, current));
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok((true, conversation))
    }
}

fn read_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>, String> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record_json FROM conversations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())?;
    match json {
        Some(v) => serde_json::from_str(&v).map(Some).map_err(|e| e.to_string()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()
    }

    fn sqlite() -> StoreBackend {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("inkline-store-{nanos}.db"));
        StoreBackend::Sqlite(SqliteStore::new(&path.to_string_lossy()).unwrap())
    }

    fn backends() -> Vec<StoreBackend> {
        vec![StoreBackend::Memory(MemoryStore::default()), sqlite()]
    }

    fn event(id: &str) -> ProcessedEvent {
        ProcessedEvent {
            provider: "sms".to_string(),
            external_message_id: id.to_string(),
            conversation_id: Some("c1".to_string()),
            processed_at: now(),
        }
    }

    #[test]
    fn commit_is_conditioned_on_step_and_revision() {
        for mut store in backends() {
            let read = store.get_or_create_conversation("c1", now()).unwrap();
            let mut next = read.clone();
            next.step = 1;
            let first = store
                .commit_turn(TurnCommit {
                    expected_step: read.step,
                    expected_revision: read.revision,
                    conversation: &next,
                    processed: Some(event("m1")),
                    answer: None,
                    inbound: Some(("hi", now())),
                    outbound: Some("hello"),
                    at: now(),
                })
                .unwrap();
            assert!(matches!(first, CommitOutcome::Committed(ref c) if c.revision == 1));

            let stale = store
                .commit_turn(TurnCommit {
                    expected_step: read.step,
                    expected_revision: read.revision,
                    conversation: &next,
                    processed: Some(event("m2")),
                    answer: None,
                    inbound: None,
                    outbound: None,
                    at: now(),
                })
                .unwrap();
            assert!(matches!(stale, CommitOutcome::Conflict));
            assert!(!store.processed_exists("sms", "m2").unwrap());
            assert_eq!(store.messages_for("c1").unwrap().len(), 2);
        }
    }

    fn first_answer<'a>(conversation: &'a Conversation, answer: &'a NewAnswer) -> TurnCommit<'a> {
        TurnCommit {
            expected_step: 0,
            expected_revision: 0,
            conversation,
            processed: Some(event("m1")),
            answer: Some(answer),
            inbound: None,
            outbound: None,
            at: now(),
        }
    }

    #[test]
    fn duplicate_ledger_entry_rolls_back_the_turn() {
        for mut store in backends() {
            let read = store.get_or_create_conversation("c1", now()).unwrap();
            let answer = NewAnswer {
                question_key: "idea".to_string(),
                answer_text: "rose".to_string(),
                normalized: Some("rose".to_string()),
                media_ref: None,
            };
            assert!(matches!(
                store.commit_turn(first_answer(&read, &answer)).unwrap(),
                CommitOutcome::Committed(_)
            ));
            let current = store.get_conversation("c1").unwrap().unwrap();
            let second = TurnCommit {
                expected_step: current.step,
                expected_revision: current.revision,
                ..first_answer(&current, &answer)
            };
            assert!(matches!(
                store.commit_turn(second).unwrap(),
                CommitOutcome::Duplicate
            ));
            assert_eq!(store.answers_for("c1").unwrap().len(), 1);
            assert_eq!(store.get_conversation("c1").unwrap().unwrap().revision, 1);
        }
    }

    #[test]
    fn advance_step_if_at_is_compare_and_set() {
        for mut store in backends() {
            store.get_or_create_conversation("c1", now()).unwrap();
            let (moved, c) = store.advance_step_if_at("c1", 0).unwrap();
            assert!(moved);
            assert_eq!(c.step, 1);
            let (moved, c) = store.advance_step_if_at("c1", 0).unwrap();
            assert!(!moved);
            assert_eq!(c.step, 1);
            assert!(store.advance_step_if_at("missing", 0).is_err());
        }
    }

    #[test]
    fn get_or_create_keeps_existing_row() {
        for mut store in backends() {
            store.get_or_create_conversation("c1", now()).unwrap();
            store.advance_step_if_at("c1", 0).unwrap();
            let again = store.get_or_create_conversation("c1", now()).unwrap();
            assert_eq!(again.step, 1);
        }
    }
}
