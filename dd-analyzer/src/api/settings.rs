//! Settings API
//!
//! POST /api/settings/llm_api_key, GET /api/settings/llm

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::services::OpenAiCompatibleClient;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LlmSettingsResponse {
    pub configured: bool,
    pub provider: Option<String>,
    pub base_url: String,
    pub model: String,
    pub requests_per_minute: u32,
}

/// POST /api/settings/llm_api_key
///
/// The database copy is authoritative; the TOML copy is best-effort. The
/// running client is replaced so new runs use the key immediately.
pub async fn set_llm_api_key(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    if !crate::config::is_valid_key(&payload.api_key) {
        return Err(ApiError::BadRequest(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }
    let key = payload.api_key.trim().to_string();

    let client = OpenAiCompatibleClient::new(&state.config.llm, key.clone())
        .map_err(|e| ApiError::Internal(format!("Failed to build LLM client: {}", e)))?;

    crate::db::settings::set_llm_api_key(&state.db, key.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save API key to database: {}", e)))?;
    crate::config::sync_key_to_toml(&key, &state.config_path);

    state.set_llm_provider(Arc::new(client)).await;
    info!("LLM API key configured via API");

    Ok(Json(SetApiKeyResponse {
        success: true,
        message: "LLM API key configured successfully".to_string(),
    }))
}

/// GET /api/settings/llm
pub async fn get_llm_settings(State(state): State<AppState>) -> Json<LlmSettingsResponse> {
    let provider = state.llm_provider().await.map(|p| p.name().to_string());

    Json(LlmSettingsResponse {
        configured: provider.is_some(),
        provider,
        base_url: state.config.llm.base_url.clone(),
        model: state.config.llm.model.clone(),
        requests_per_minute: state.config.llm.requests_per_minute,
    })
}

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings/llm_api_key", post(set_llm_api_key))
        .route("/api/settings/llm", get(get_llm_settings))
}
