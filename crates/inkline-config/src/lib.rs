use inkline_contracts::{Question, QuestionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub outbound: Outbound,
    #[serde(default)]
    pub engine: Engine,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub tour: Option<Tour>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    pub audit: Audit,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_outbound_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    #[serde(default = "default_max_parse_failures")]
    pub max_parse_failures: u32,
    #[serde(default = "default_hold_cooldown_hours")]
    pub hold_cooldown_hours: i64,
    #[serde(default = "default_slot_tolerance_minutes")]
    pub slot_tolerance_minutes: i64,
    #[serde(default = "default_bundle_amount_threshold")]
    pub bundle_amount_threshold: i64,
    #[serde(default = "default_recent_message_tail")]
    pub recent_message_tail: usize,
    #[serde(default = "default_max_redispatch")]
    pub max_redispatch: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_parse_failures: default_max_parse_failures(),
            hold_cooldown_hours: default_hold_cooldown_hours(),
            slot_tolerance_minutes: default_slot_tolerance_minutes(),
            bundle_amount_threshold: default_bundle_amount_threshold(),
            recent_message_tail: default_recent_message_tail(),
            max_redispatch: default_max_redispatch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub home_city: String,
    #[serde(default)]
    pub stops: Vec<TourStop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourStop {
    pub city: String,
    pub dates: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    pub rate_per_cm2_minor: i64,
    pub minimum_minor: i64,
    #[serde(default = "default_spread_percent")]
    pub spread_percent: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub jsonl_path: String,
    #[serde(default)]
    pub immutable_mirror_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_outbound_timeout_ms() -> u64 {
    5_000
}

fn default_max_parse_failures() -> u32 {
    3
}

fn default_hold_cooldown_hours() -> i64 {
    12
}

fn default_slot_tolerance_minutes() -> i64 {
    90
}

fn default_bundle_amount_threshold() -> i64 {
    100
}

fn default_recent_message_tail() -> usize {
    10
}

fn default_max_redispatch() -> usize {
    2
}

fn default_spread_percent() -> i64 {
    25
}

fn default_currency() -> String {
    "GBP".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    match cfg.outbound.mode.as_str() {
        "log" => {}
        "http" => {
            if cfg
                .outbound
                .endpoint
                .as_ref()
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
            {
                return Err(ConfigError::UnsupportedConfig(
                    "outbound.endpoint is required when outbound.mode=http".to_string(),
                ));
            }
        }
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "outbound.mode={other} is not implemented; supported: log, http"
            )))
        }
    }
    if cfg.outbound.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "outbound.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.engine.max_parse_failures == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "engine.max_parse_failures must be >= 1".to_string(),
        ));
    }
    if cfg.engine.hold_cooldown_hours < 0 || cfg.engine.slot_tolerance_minutes < 0 {
        return Err(ConfigError::UnsupportedConfig(
            "engine cooldown and tolerance windows must not be negative".to_string(),
        ));
    }
    validate_questions(&cfg.questions)?;
    if let Some(pricing) = &cfg.pricing {
        if pricing.rate_per_cm2_minor <= 0 || pricing.minimum_minor < 0 {
            return Err(ConfigError::UnsupportedConfig(
                "pricing.rate_per_cm2_minor must be > 0 and pricing.minimum_minor >= 0"
                    .to_string(),
            ));
        }
    }
    if cfg.logging.format != "pretty" && cfg.logging.format != "json" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "logging.format={} is not implemented; supported: pretty, json",
            cfg.logging.format
        )));
    }
    Ok(())
}

fn validate_questions(questions: &[Question]) -> Result<(), ConfigError> {
    if questions.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "questions must contain at least one entry".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for q in questions {
        if q.key.trim().is_empty() || q.prompt.trim().is_empty() {
            return Err(ConfigError::UnsupportedConfig(
                "questions[].key and questions[].prompt must not be empty".to_string(),
            ));
        }
        if !seen.insert(q.key.as_str()) {
            return Err(ConfigError::UnsupportedConfig(format!(
                "duplicate question key: {}",
                q.key
            )));
        }
        if q.kind == QuestionKind::Media && q.required {
            return Err(ConfigError::UnsupportedConfig(format!(
                "media question {} must be optional",
                q.key
            )));
        }
    }
    Ok(())
}
