//! Rubric and evaluation handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::report::load_report;
use super::require_run;
use crate::db;
use crate::db::risks::FindingFilter;
use crate::models::{EvalCriterion, EvalRubric, Evaluation, RunStatus};
use crate::services::evaluator;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateRubricRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub criteria: Vec<EvalCriterion>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub rubric_id: Uuid,
}

/// POST /rubrics
pub async fn create_rubric(
    State(state): State<AppState>,
    Json(request): Json<CreateRubricRequest>,
) -> ApiResult<(StatusCode, Json<EvalRubric>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if request.criteria.is_empty() {
        return Err(ApiError::BadRequest("at least one criterion is required".to_string()));
    }
    if let Some(bad) = request
        .criteria
        .iter()
        .find(|c| c.name.trim().is_empty() || c.weight < 0.0 || c.max_score <= 0.0)
    {
        return Err(ApiError::BadRequest(format!(
            "criterion '{}' needs a name, a non-negative weight and a positive max_score",
            bad.name
        )));
    }

    let rubric = EvalRubric::new(request.name.trim().to_string(), request.description, request.criteria);
    db::evaluations::insert_rubric(&state.db, &rubric).await?;

    tracing::info!(rubric_id = %rubric.id, name = %rubric.name, "Rubric created");
    Ok((StatusCode::CREATED, Json(rubric)))
}

/// GET /rubrics
pub async fn list_rubrics(State(state): State<AppState>) -> ApiResult<Json<Vec<EvalRubric>>> {
    Ok(Json(db::evaluations::list_rubrics(&state.db).await?))
}

/// POST /analysis/:run_id/evaluations
///
/// Grades a completed run with the LLM. Returns 201 with the stored evaluation.
pub async fn evaluate(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(request): Json<EvaluateRequest>,
) -> ApiResult<(StatusCode, Json<Evaluation>)> {
    let run = require_run(&state, run_id).await?;
    if run.status != RunStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "Run {} is {}; only completed runs can be evaluated",
            run_id, run.status
        )));
    }

    let rubric = db::evaluations::load_rubric(&state.db, request.rubric_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rubric not found: {}", request.rubric_id)))?;
    let llm = state.llm_provider().await.ok_or_else(|| {
        ApiError::ServiceUnavailable(
            "LLM API key not configured (POST /api/settings/llm_api_key)".to_string(),
        )
    })?;

    let report = load_report(&state, run_id).await?;
    let findings = db::risks::list_findings(&state.db, run_id, &FindingFilter::default()).await?;

    let evaluation = evaluator::evaluate_run(llm.as_ref(), &rubric, run_id, &report, &findings)
        .await
        .map_err(|e| ApiError::Internal(format!("Evaluation failed: {}", e)))?;
    db::evaluations::insert_evaluation(&state.db, &evaluation).await?;

    Ok((StatusCode::CREATED, Json(evaluation)))
}

/// GET /analysis/:run_id/evaluations
pub async fn list_evaluations(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Evaluation>>> {
    require_run(&state, run_id).await?;
    Ok(Json(db::evaluations::list_evaluations(&state.db, run_id).await?))
}

pub fn evaluation_routes() -> Router<AppState> {
    Router::new()
        .route("/rubrics", get(list_rubrics).post(create_rubric))
        .route("/analysis/:run_id/evaluations", get(list_evaluations).post(evaluate))
}
