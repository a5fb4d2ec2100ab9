//! Analysis run handlers
//!
//! POST|GET /dd/:id/analysis, GET /analysis/:run_id,
//! POST /analysis/:run_id/{cancel,resume}, POST /analysis/:run_id/gates/:gate/approve

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use dd_common::events::DdEvent;
use dd_common::PipelineStage;

use super::{require_dd, require_run};
use crate::db;
use crate::models::{AnalysisRun, ProcessingCheckpoint, RunStatus, StageProgress};
use crate::pipeline::ResumePlan;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct StartAnalysisParams {
    /// Overrides `pipeline.review_gates`
    pub review_gates: Option<bool>,
}

/// GET /analysis/:run_id response
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run: AnalysisRun,
    pub executing: bool,
    pub current_stage: PipelineStage,
    pub current_stage_label: &'static str,
    pub completed_stages: Vec<PipelineStage>,
    pub stage_progress: BTreeMap<PipelineStage, StageProgress>,
    pub approved_gates: BTreeSet<PipelineStage>,
    pub percent: f64,
    pub error_stage: Option<PipelineStage>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub run_id: Uuid,
    pub from_stage: PipelineStage,
    pub replayed_items: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    /// `cancelling` while the executing task winds down, else `cancelled`
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct ApproveGateResponse {
    pub run_id: Uuid,
    pub gate: PipelineStage,
    /// True when the approval let a paused run continue
    pub resumed: bool,
}

async fn require_checkpoint(state: &AppState, run_id: Uuid) -> ApiResult<ProcessingCheckpoint> {
    db::checkpoints::load_checkpoint(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No checkpoint for run {}", run_id)))
}

/// Refuse when another run of the same DD is pending, running or paused
async fn ensure_no_other_active_run(state: &AppState, run: &AnalysisRun) -> ApiResult<()> {
    if let Some(active) = db::runs::find_active_run(&state.db, run.dd_id).await? {
        if active.id != run.id {
            return Err(ApiError::Conflict(format!(
                "Run {} of this DD is {}",
                active.id, active.status
            )));
        }
    }
    Ok(())
}

/// POST /dd/:id/analysis
///
/// Creates a run with a fresh checkpoint and starts it. Returns 202.
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
    Query(params): Query<StartAnalysisParams>,
) -> ApiResult<(StatusCode, Json<AnalysisRun>)> {
    let dd = require_dd(&state, dd_id).await?;
    state.blueprints.get(&dd.transaction_type)?;

    if state.llm_provider().await.is_none() {
        return Err(ApiError::ServiceUnavailable(
            "LLM API key not configured (POST /api/settings/llm_api_key)".to_string(),
        ));
    }
    if let Some(active) = db::runs::find_active_run(&state.db, dd_id).await? {
        return Err(ApiError::Conflict(format!(
            "Run {} of this DD is {}",
            active.id, active.status
        )));
    }

    let run_number = db::runs::next_run_number(&state.db, dd_id).await?;
    let review_gates = params.review_gates.unwrap_or(state.config.pipeline.review_gates);
    let run = AnalysisRun::new(dd_id, run_number, dd.transaction_type.clone(), review_gates);
    // The active-run index settles concurrent starts for the same DD
    if let Err(e) = db::runs::insert_run(&state.db, &run).await {
        return Err(if e.is_unique_violation() {
            ApiError::Conflict(format!("Another analysis run of DD {} was started", dd_id))
        } else {
            e.into()
        });
    }
    db::checkpoints::create_checkpoint(&state.db, &ProcessingCheckpoint::new(run.id, dd_id)).await?;

    tracing::info!(
        dd_id = %dd_id,
        run_id = %run.id,
        run_number,
        review_gates,
        "Analysis run created"
    );

    state.launch_run(run.id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /dd/:id/analysis
pub async fn list_runs(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
) -> ApiResult<Json<Vec<AnalysisRun>>> {
    require_dd(&state, dd_id).await?;
    Ok(Json(db::runs::list_runs(&state.db, dd_id).await?))
}

/// GET /analysis/:run_id
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunStatusResponse>> {
    let run = require_run(&state, run_id).await?;
    let checkpoint = require_checkpoint(&state, run_id).await?;
    let executing = state.is_run_executing(run_id).await;

    Ok(Json(RunStatusResponse {
        run,
        executing,
        current_stage: checkpoint.current_stage,
        current_stage_label: checkpoint.current_stage.label(),
        percent: checkpoint.progress_percent(),
        completed_stages: checkpoint.completed_stages,
        stage_progress: checkpoint.stage_progress,
        approved_gates: checkpoint.approved_gates,
        error_stage: checkpoint.error_stage,
        error_message: checkpoint.error_message,
        retry_count: checkpoint.retry_count,
    }))
}

/// POST /analysis/:run_id/cancel
///
/// An executing run stops after its current item; a paused or interrupted
/// run is marked cancelled directly. Cancelled runs can be resumed.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let run = require_run(&state, run_id).await?;

    if let Some(token) = state.cancellation_tokens.read().await.get(&run_id) {
        token.cancel();
        tracing::info!(run_id = %run_id, "Cancellation requested");
        return Ok((
            StatusCode::ACCEPTED,
            Json(CancelResponse {
                run_id,
                state: "cancelling".to_string(),
            }),
        ));
    }

    if matches!(
        run.status,
        RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
    ) {
        return Err(ApiError::BadRequest(format!(
            "Run already in terminal state: {}",
            run.status
        )));
    }

    let checkpoint = require_checkpoint(&state, run_id).await?;
    db::runs::update_run_status(&state.db, run_id, RunStatus::Cancelled, None).await?;

    tracing::info!(run_id = %run_id, previous = %run.status, "Idle run cancelled");
    state.event_bus.emit_lossy(DdEvent::AnalysisCancelled {
        dd_id: run.dd_id,
        run_id,
        stage: checkpoint.current_stage,
        timestamp: Utc::now(),
    });

    Ok((
        StatusCode::OK,
        Json(CancelResponse {
            run_id,
            state: "cancelled".to_string(),
        }),
    ))
}

/// POST /analysis/:run_id/resume
///
/// Continues a failed, interrupted, cancelled or paused run from its
/// checkpoint. Returns 202 with the stage execution restarts at.
pub async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ResumeResponse>)> {
    let run = require_run(&state, run_id).await?;

    if state.is_run_executing(run_id).await {
        return Err(ApiError::Conflict(format!("Run {} is already executing", run_id)));
    }
    if run.status == RunStatus::Completed {
        return Err(ApiError::Conflict(format!("Run {} has already completed", run_id)));
    }
    ensure_no_other_active_run(&state, &run).await?;

    let checkpoint = require_checkpoint(&state, run_id).await?;
    let plan = ResumePlan::derive(&checkpoint)?;

    state.launch_run(run_id).await?;

    tracing::info!(run_id = %run_id, from_stage = %plan.start, "Resume requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(ResumeResponse {
            run_id,
            from_stage: plan.start,
            replayed_items: plan.replayed_items,
        }),
    ))
}

/// POST /analysis/:run_id/gates/:gate/approve
///
/// Approvals may be given ahead of time. A run paused at the approved gate
/// continues immediately.
pub async fn approve_gate(
    State(state): State<AppState>,
    Path((run_id, gate)): Path<(Uuid, String)>,
) -> ApiResult<Json<ApproveGateResponse>> {
    let gate: PipelineStage = gate.parse()?;
    if !gate.is_review_gate() {
        return Err(ApiError::BadRequest(format!("{} is not a review gate", gate)));
    }

    require_run(&state, run_id).await?;
    if !db::checkpoints::add_approved_gate(&state.db, run_id, gate).await? {
        return Err(ApiError::NotFound(format!("No checkpoint for run {}", run_id)));
    }

    tracing::info!(run_id = %run_id, gate = %gate, "Review gate approved");

    // Read back after the approval is stored; a run still pausing at this
    // gate is resumed by its own task instead
    let run = require_run(&state, run_id).await?;
    let checkpoint = require_checkpoint(&state, run_id).await?;
    let paused_here = run.status == RunStatus::AwaitingReview
        && checkpoint.current_stage == gate
        && !state.is_run_executing(run_id).await;
    if paused_here {
        match state.launch_run(run_id).await {
            Ok(()) | Err(ApiError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(Json(ApproveGateResponse {
        run_id,
        gate,
        resumed: paused_here,
    }))
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/dd/:id/analysis", get(list_runs).post(start_analysis))
        .route("/analysis/:run_id", get(get_run_status))
        .route("/analysis/:run_id/cancel", post(cancel_run))
        .route("/analysis/:run_id/resume", post(resume_run))
        .route("/analysis/:run_id/gates/:gate/approve", post(approve_gate))
}
