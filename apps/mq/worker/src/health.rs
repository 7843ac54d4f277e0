//! Health and admin HTTP handlers.
//!
//! - Liveness probes: `/health`, `/healthz`
//! - Readiness probes: `/ready`, `/readyz`
//! - Prometheus metrics: `/metrics`
//! - Host statistics: `/stats` (JSON), `/stats/text`
//! - Queue inspection: `/queues/{name}?limit=10`

use crate::metrics;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use messaging::{Envelope, MessagingHost};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Upper bound for `/queues/{name}?limit=`
const MAX_PEEK: usize = 100;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub host: Arc<MessagingHost>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        host: Arc<MessagingHost>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            host,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

type ApiError = (StatusCode, Json<Value>);

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

/// Always OK while the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Ready once the broker answers.
pub async fn ready_handler(State(state): State<HealthState>) -> Result<Json<Value>, ApiError> {
    let broker = state.host.client().broker();
    match broker.health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "ready",
            "checks": { (broker.kind()): "ok" }
        }))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": { (broker.kind()): format!("error: {}", e) }
                })),
            ))
        }
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}

pub async fn stats_handler(State(state): State<HealthState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.host.stats_report().await.map_err(internal_error)?;
    Ok(Json(report))
}

pub async fn stats_text_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state.host.stats_description().await.map_err(internal_error)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    ))
}

#[derive(Debug, Deserialize)]
pub struct PeekParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Oldest messages of a queue without consuming them.
///
/// `GET /queues/Greeting.dlq?limit=10`
pub async fn queue_handler(
    State(state): State<HealthState>,
    Path(queue): Path<String>,
    Query(params): Query<PeekParams>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.host.client();
    let limit = params.limit.min(MAX_PEEK);

    let length = client.len(&queue).await.map_err(internal_error)?;
    let messages: Vec<Envelope<Value>> = client
        .peek(&queue, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "queue": queue,
        "length": length,
        "limit": limit,
        "messages": messages,
    })))
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/text", get(stats_text_handler))
        .route("/queues/{name}", get(queue_handler))
        .with_state(state)
}
