//! Finding listing and review

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::require_run;
use crate::db;
use crate::db::risks::FindingFilter;
use crate::models::{Finding, ReviewStatus};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ReviewFindingRequest {
    pub status: Option<ReviewStatus>,
    pub reviewer_note: Option<String>,
    pub reviewed_by: Option<String>,
}

/// GET /analysis/:run_id/findings?severity&status&category&include_duplicates
pub async fn list_findings(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(filter): Query<FindingFilter>,
) -> ApiResult<Json<Vec<Finding>>> {
    require_run(&state, run_id).await?;
    Ok(Json(db::risks::list_findings(&state.db, run_id, &filter).await?))
}

/// PATCH /findings/:id
pub async fn review_finding(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
    Json(request): Json<ReviewFindingRequest>,
) -> ApiResult<Json<Finding>> {
    if request.status.is_none() && request.reviewer_note.is_none() && request.reviewed_by.is_none() {
        return Err(ApiError::BadRequest(
            "Nothing to update: set status, reviewer_note or reviewed_by".to_string(),
        ));
    }

    let updated = db::risks::update_finding_review(
        &state.db,
        finding_id,
        request.status,
        request.reviewer_note.as_deref(),
        request.reviewed_by.as_deref(),
    )
    .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("Finding not found: {}", finding_id)));
    }

    let finding = db::risks::load_finding(&state.db, finding_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Finding not found: {}", finding_id)))?;

    tracing::info!(finding_id = %finding_id, status = %finding.status, "Finding reviewed");
    Ok(Json(finding))
}

pub fn finding_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/:run_id/findings", get(list_findings))
        .route("/findings/:id", patch(review_finding))
}
