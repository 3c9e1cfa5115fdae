use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use inkline_config::Config;
use inkline_contracts::{ErrorBody, ErrorResponse, HandoverPacket, InboundEvent, OutcomeRecord};

mod audit;
mod engine;
mod gate;
mod outbound;
mod store;

pub use audit::{verify_audit_chain, verify_audit_chain_with_mirror};
pub use engine::{engine_settings, Engine, EngineError};
pub use outbound::{Ack, HttpOutbound, LogOutbound, Outbound, SendError};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let outbound = outbound::from_config(&cfg.outbound)?;
    build_app_with_outbound(cfg, outbound).await
}

pub async fn build_app_with_outbound(
    cfg: Config,
    outbound: Arc<dyn Outbound>,
) -> Result<Router, String> {
    Ok(router(build_engine(&cfg, outbound).await?))
}

pub async fn build_engine(cfg: &Config, outbound: Arc<dyn Outbound>) -> Result<Engine, String> {
    Engine::new(cfg, outbound).await
}

/// Routes over an existing engine, so collaborators holding the same engine
/// see the same store.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/inbound", post(inbound))
        .route("/v1/conversations/{id}/handover", get(handover))
        .with_state(engine)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn inbound(
    State(engine): State<Engine>,
    Json(event): Json<InboundEvent>,
) -> Result<Json<OutcomeRecord>, (StatusCode, Json<ErrorResponse>)> {
    engine.handle_inbound(event).await.map(Json).map_err(error_response)
}

async fn handover(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<HandoverPacket>, (StatusCode, Json<ErrorResponse>)> {
    engine.handover_packet(&id).await.map(Json).map_err(error_response)
}

fn error_response(err: EngineError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        EngineError::IllegalTransition(_) => (StatusCode::CONFLICT, "illegal_transition"),
        EngineError::Send(_) => (StatusCode::BAD_GATEWAY, "send_failed"),
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        EngineError::Contention(_) => (StatusCode::SERVICE_UNAVAILABLE, "contention"),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
    };
    if status.is_server_error() {
        tracing::error!(code, error = %err, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: err.to_string(),
                details: None,
            },
        }),
    )
}
