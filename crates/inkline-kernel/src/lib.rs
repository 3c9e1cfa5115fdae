pub mod dispatch;
pub mod extract;
pub mod handlers;
pub mod handover;
pub mod policy;
pub mod repair;
pub mod replies;
pub mod settings;
pub mod state;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use dispatch::{dispatch, handler_for, NewAnswer, StatusHandler, Turn, TurnPlan};
pub use handover::{build_handover_packet, estimate_price, latest_answer_per_key, missing_required};
pub use repair::{on_parse_failure, on_parse_success, on_resume, RepairDecision};
pub use settings::{EngineSettings, PricingSettings, TourSettings, TourStop};
pub use state::{advance_step_if_at, can_transition, restart, transition, IllegalTransition};

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
