//! NurseTalk HTTP API
//!
//! Axum-based HTTP server exposing the provider webhook and a read-only
//! conversation history endpoint.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - POST /webhook               — inbound message from the provider
//! - GET  /conversations/{phone} — stored conversation history, newest first
//! - GET  /health                — health check with DB status
//! - GET  /version               — server version info
//! - GET  /media/{filename}      — synthesized audio files

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use nursetalk_core::phone::canonical_phone;
use nursetalk_core::NurseTalkConfig;
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::history;
use crate::subsystems::media;
use crate::subsystems::triage::{handle_incoming, InboundMessage, TriageDeps};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub pool: SqlitePool,
    pub config: NurseTalkConfig,
    pub deps: Arc<TriageDeps>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/conversations/:phone", get(conversations_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/media/:filename", get(media_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    pool: SqlitePool,
    config: NurseTalkConfig,
    deps: Arc<TriageDeps>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { pool, config, deps });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("NurseTalk HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Provider webhook payload (form-encoded).
#[derive(Debug, Deserialize, Default)]
pub struct WebhookForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "NumMedia")]
    pub num_media: Option<String>,
    #[serde(rename = "MediaUrl0")]
    pub media_url: Option<String>,
    #[serde(rename = "MediaContentType0")]
    pub media_content_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner webhook — validates the sender and runs the full turn.
pub async fn webhook_inner(
    pool: &SqlitePool,
    deps: &TriageDeps,
    form: WebhookForm,
) -> (StatusCode, serde_json::Value) {
    let from = match form.from {
        Some(f) if !f.trim().is_empty() => f,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "From field is required",
                    "status": "error",
                }),
            );
        }
    };

    let has_media = form
        .num_media
        .as_deref()
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| n > 0)
        .unwrap_or(false)
        || form.media_url.is_some();

    let inbound = InboundMessage {
        from,
        body: form.body,
        media_url: if has_media { form.media_url } else { None },
        media_content_type: form.media_content_type,
    };

    let report = handle_incoming(pool, deps, inbound).await;

    // The provider only needs an acknowledgment; delivery already happened
    // out-of-band through its REST API.
    (
        StatusCode::OK,
        serde_json::json!({
            "status": report.status.as_str(),
        }),
    )
}

/// Inner history — canonicalizes the phone and reads the log, newest first.
pub async fn conversations_inner(
    pool: &SqlitePool,
    phone: &str,
    query: HistoryQuery,
) -> (StatusCode, serde_json::Value) {
    let phone = canonical_phone(phone);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match history::recent_turns(pool, &phone, limit).await {
        Ok(turns) => (
            StatusCode::OK,
            serde_json::json!({
                "phone_number": phone,
                "count": turns.len(),
                "turns": turns,
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &SqlitePool) -> (StatusCode, serde_json::Value) {
    match nursetalk_core::db::health_check(pool).await {
        Ok(sqlite_version) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "sqlite": sqlite_version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "nursetalk",
    })
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<WebhookForm>,
) -> impl IntoResponse {
    let (status, body) = webhook_inner(&state.pool, &state.deps, form).await;
    (status, Json(body))
}

pub async fn conversations_handler(
    State(state): State<Arc<HttpState>>,
    Path(phone): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (status, body) = conversations_inner(&state.pool, &phone, query).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn media_handler(
    State(state): State<Arc<HttpState>>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    let Some(speech) = state.deps.speech.as_ref() else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let Some(path) = speech.media.resolve(&filename) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, media::content_type_for(&path))],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
