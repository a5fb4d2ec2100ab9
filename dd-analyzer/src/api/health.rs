//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while no LLM is configured
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub llm_configured: bool,
    pub active_runs: usize,
    pub blueprints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let llm_configured = state.llm_provider().await.is_some();
    let active_runs = state.cancellation_tokens.read().await.len();
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if llm_configured { "ok" } else { "degraded" }.to_string(),
        module: "dd-analyzer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        llm_configured,
        active_runs,
        blueprints: state.blueprints.keys().map(str::to_string).collect(),
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
