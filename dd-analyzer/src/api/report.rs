//! Report export
//!
//! GET /analysis/:run_id/report (JSON), GET /analysis/:run_id/report.md

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::require_run;
use crate::services::report::{self, RunReport};
use crate::{ApiError, ApiResult, AppState};

pub(crate) async fn load_report(state: &AppState, run_id: Uuid) -> ApiResult<RunReport> {
    let run = require_run(state, run_id).await?;
    let value = run.report.ok_or_else(|| {
        ApiError::NotFound(format!("Run {} has no report yet (status {})", run_id, run.status))
    })?;

    serde_json::from_value(value)
        .map_err(|e| ApiError::Internal(format!("Stored report of run {} is unreadable: {}", run_id, e)))
}

/// GET /analysis/:run_id/report
pub async fn get_report(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> ApiResult<Json<RunReport>> {
    Ok(Json(load_report(&state, run_id).await?))
}

/// GET /analysis/:run_id/report.md
pub async fn get_report_markdown(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let report = load_report(&state, run_id).await?;
    let markdown = report::render_markdown(&report);
    let disposition = format!("attachment; filename=\"dd-report-{}.md\"", run_id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        markdown,
    ))
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/:run_id/report", get(get_report))
        .route("/analysis/:run_id/report.md", get(get_report_markdown))
}
