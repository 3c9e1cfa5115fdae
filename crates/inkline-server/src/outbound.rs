use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inkline_config::Outbound as OutboundConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider rejected message with status {0}")]
    Rejected(u16),
    #[error("send timed out")]
    Timeout,
}

/// Channel used to deliver replies. Delivery is at-least-once attempted and
/// never assumed synchronous.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, identity: &str, text: &str) -> Result<Ack, SendError>;
}

/// Acknowledges locally and logs the message. Used in development and when
/// another process relays the transcript.
pub struct LogOutbound;

#[async_trait]
impl Outbound for LogOutbound {
    async fn send(&self, identity: &str, text: &str) -> Result<Ack, SendError> {
        let id = format!("log_{}", uuid::Uuid::new_v4().as_simple());
        tracing::info!(identity, message_id = %id, chars = text.chars().count(), "outbound message");
        Ok(Ack {
            provider_message_id: Some(id),
        })
    }
}

pub struct HttpOutbound {
    client: Client,
    endpoint: String,
}

impl HttpOutbound {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl Outbound for HttpOutbound {
    async fn send(&self, identity: &str, text: &str) -> Result<Ack, SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({"to": identity, "text": text}))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout
                } else {
                    SendError::Transport(e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Rejected(status.as_u16()));
        }
        // Providers that return no body still count as delivered.
        let ack = response.json::<Ack>().await.unwrap_or(Ack {
            provider_message_id: None,
        });
        Ok(ack)
    }
}

pub fn from_config(cfg: &OutboundConfig) -> Result<Arc<dyn Outbound>, String> {
    match cfg.mode.as_str() {
        "log" => Ok(Arc::new(LogOutbound)),
        "http" => {
            let endpoint = cfg
                .endpoint
                .as_deref()
                .ok_or_else(|| "outbound.endpoint is required for http mode".to_string())?;
            Ok(Arc::new(HttpOutbound::new(
                endpoint,
                Duration::from_millis(cfg.timeout_ms),
            )?))
        }
        other => Err(format!("unsupported outbound.mode: {other}")),
    }
}
