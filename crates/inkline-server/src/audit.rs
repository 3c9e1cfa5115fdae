use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use inkline_contracts::{ConversationStatus, Disposition};
use inkline_kernel::sha256_hex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Hash-chained JSONL log of every engine outcome.
pub struct AuditJsonl {
    file: Arc<Mutex<tokio::fs::File>>,
    immutable_mirror: Option<Arc<Mutex<tokio::fs::File>>>,
    sqlite: Option<Arc<Mutex<Connection>>>,
    last_hash: Arc<Mutex<Option<String>>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditRecord {
    audit_id: String,
    conversation_id: String,
    correlation_id: String,
    action: String,
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    disposition: Option<Disposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<ConversationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u32>,
    ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    record_hash: String,
}

impl AuditRecord {
    pub fn new(conversation_id: &str, correlation_id: &str, action: &str, result: &str) -> Self {
        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4().as_simple()),
            conversation_id: conversation_id.to_string(),
            correlation_id: correlation_id.to_string(),
            action: action.to_string(),
            result: result.to_string(),
            disposition: None,
            status: None,
            step: None,
            ts: Utc::now().to_rfc3339(),
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    pub fn with_state(
        mut self,
        disposition: Option<Disposition>,
        status: Option<ConversationStatus>,
        step: Option<u32>,
    ) -> Self {
        self.disposition = disposition;
        self.status = status;
        self.step = step;
        self
    }
}

impl AuditJsonl {
    pub async fn new(
        path: &str,
        sqlite_path: Option<&str>,
        immutable_mirror_path: Option<&str>,
    ) -> Result<Self, String> {
        let last_hash = std::fs::read_to_string(path).ok().and_then(|text| {
            text.lines().rev().find_map(|line| {
                serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| {
                        v.get("record_hash")
                            .and_then(|hash| hash.as_str())
                            .map(|s| s.to_string())
                    })
            })
        });

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| e.to_string())?;

        let immutable_mirror = match immutable_mirror_path {
            Some(path) if !path.is_empty() => Some(Arc::new(Mutex::new(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| e.to_string())?,
            ))),
            _ => None,
        };

        let sqlite = match sqlite_path {
            Some(path) => {
                let conn = Connection::open(path).map_err(|e| e.to_string())?;
                conn.busy_timeout(Duration::from_secs(5))
                    .map_err(|e| e.to_string())?;
                conn.execute_batch(
                    "
                    CREATE TABLE IF NOT EXISTS audit_records (
                        audit_id TEXT PRIMARY KEY,
                        conversation_id TEXT NOT NULL,
                        correlation_id TEXT NOT NULL,
                        action TEXT NOT NULL,
                        result TEXT NOT NULL,
                        ts TEXT NOT NULL,
                        record_json TEXT NOT NULL
                    );
                    ",
                )
                .map_err(|e| e.to_string())?;
                Some(Arc::new(Mutex::new(conn)))
            }
            None => None,
        };

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            immutable_mirror,
            sqlite,
            last_hash: Arc::new(Mutex::new(last_hash)),
        })
    }

    /// Best effort: a failed audit write is logged, never surfaced to the
    /// transport.
    pub async fn append(&self, mut rec: AuditRecord) {
        let mut last_hash = self.last_hash.lock().await;
        rec.prev_hash = last_hash.clone();
        match serde_json::to_string(&rec) {
            Ok(seed) => rec.record_hash = sha256_hex(seed.as_bytes()),
            Err(e) => {
                tracing::error!(error = %e, "audit record serialization failed");
                return;
            }
        }
        let line = match serde_json::to_string(&rec) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "audit record serialization failed");
                return;
            }
        };

        {
            let mut file = self.file.lock().await;
            if let Err(e) = write_line(&mut file, &line).await {
                tracing::error!(error = %e, "audit append failed");
                return;
            }
        }
        if let Some(mirror) = &self.immutable_mirror {
            let mut mirror_file = mirror.lock().await;
            if let Err(e) = write_line(&mut mirror_file, &line).await {
                tracing::warn!(error = %e, "audit mirror append failed");
            }
        }
        *last_hash = Some(rec.record_hash.clone());

        if let Some(sqlite) = &self.sqlite {
            let conn = sqlite.lock().await;
            if let Err(e) = conn.execute(
                "
                INSERT OR REPLACE INTO audit_records
                (audit_id, conversation_id, correlation_id, action, result, ts, record_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    rec.audit_id,
                    rec.conversation_id,
                    rec.correlation_id,
                    rec.action,
                    rec.result,
                    rec.ts,
                    line
                ],
            ) {
                tracing::warn!(error = %e, "audit sqlite copy failed");
            }
        }
    }
}

async fn write_line(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

pub fn verify_audit_chain(path: &str) -> Result<String, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut prev: Option<String> = None;
    let mut count = 0usize;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: AuditRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {} parse failed: {e}", idx + 1))?;
        if count > 0 && rec.prev_hash != prev {
            return Err(format!(
                "line {} prev_hash mismatch: expected {:?}, got {:?}",
                idx + 1,
                prev,
                rec.prev_hash
            ));
        }
        let mut seeded = rec.clone();
        seeded.record_hash.clear();
        let seed = serde_json::to_string(&seeded)
            .map_err(|e| format!("line {} hash seed serialize failed: {e}", idx + 1))?;
        let expected_hash = sha256_hex(seed.as_bytes());
        if rec.record_hash != expected_hash {
            return Err(format!(
                "line {} record_hash mismatch: expected {}, got {}",
                idx + 1,
                expected_hash,
                rec.record_hash
            ));
        }
        prev = Some(rec.record_hash);
        count += 1;
    }

    Ok(format!("audit chain verified: {count} records"))
}

/// Verifies the primary chain and, when given, that the mirror holds the
/// same records.
pub fn verify_audit_chain_with_mirror(path: &str, mirror_path: Option<&str>) -> Result<String, String> {
    let summary = verify_audit_chain(path)?;
    let Some(mirror_path) = mirror_path else {
        return Ok(summary);
    };
    verify_audit_chain(mirror_path).map_err(|e| format!("mirror: {e}"))?;
    let primary = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mirror = std::fs::read_to_string(mirror_path).map_err(|e| e.to_string())?;
    if primary != mirror {
        return Err("audit mirror diverges from primary log".to_string());
    }
    Ok(format!("{summary}; mirror identical"))
}
