//! Perspective risk handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::require_dd;
use crate::db;
use crate::models::PerspectiveRisk;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateRiskRequest {
    pub title: String,
    /// Question asked of every document
    pub query: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub created_by: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// POST /dd/:id/risks
pub async fn create_risk(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
    Json(request): Json<CreateRiskRequest>,
) -> ApiResult<(StatusCode, Json<PerspectiveRisk>)> {
    require_dd(&state, dd_id).await?;
    if request.title.trim().is_empty() || request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("title and query are required".to_string()));
    }

    let risk = PerspectiveRisk::new(
        dd_id,
        request.title.trim().to_string(),
        request.query.trim().to_string(),
        request.category.trim().to_lowercase(),
        request.created_by,
    );
    db::risks::insert_perspective_risk(&state.db, &risk).await?;

    tracing::info!(dd_id = %dd_id, risk_id = %risk.id, category = %risk.category, "Perspective risk added");
    Ok((StatusCode::CREATED, Json(risk)))
}

/// GET /dd/:id/risks
pub async fn list_risks(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
) -> ApiResult<Json<Vec<PerspectiveRisk>>> {
    require_dd(&state, dd_id).await?;
    Ok(Json(db::risks::list_perspective_risks(&state.db, dd_id).await?))
}

/// DELETE /dd/:id/risks/:risk_id
pub async fn delete_risk(
    State(state): State<AppState>,
    Path((dd_id, risk_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    if !db::risks::delete_perspective_risk(&state.db, dd_id, risk_id).await? {
        return Err(ApiError::NotFound(format!("Perspective risk not found: {}", risk_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn risk_routes() -> Router<AppState> {
    Router::new()
        .route("/dd/:id/risks", get(list_risks).post(create_risk))
        .route("/dd/:id/risks/:risk_id", delete(delete_risk))
}
