//! DD project handlers
//!
//! POST /dd, GET /dd, GET|PATCH|DELETE /dd/:id

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dd_common::events::DdEvent;

use super::require_dd;
use crate::db;
use crate::models::{AnalysisRun, DueDiligence};
use crate::services::zip_ingest::{self, IngestLimits};
use crate::{ApiError, ApiResult, AppState};

/// POST /dd query parameters (the body is the ZIP archive)
#[derive(Debug, Deserialize)]
pub struct CreateDdParams {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub transaction_type: String,
    #[serde(default)]
    pub briefing: String,
    /// Name of the uploaded archive, kept for reference
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateDdResponse {
    pub dd: DueDiligence,
    pub documents: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DdDetail {
    #[serde(flatten)]
    pub dd: DueDiligence,
    pub document_count: i64,
    pub latest_run: Option<AnalysisRun>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDdRequest {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub briefing: Option<String>,
    pub transaction_type: Option<String>,
}

fn check_transaction_type(state: &AppState, transaction_type: &str) -> ApiResult<()> {
    if state.blueprints.contains(transaction_type) {
        return Ok(());
    }
    let known: Vec<&str> = state.blueprints.keys().collect();
    Err(ApiError::BadRequest(format!(
        "Unknown transaction type '{}' (known: {})",
        transaction_type,
        known.join(", ")
    )))
}

/// POST /dd
///
/// Creates the DD and ingests the uploaded ZIP. Returns 201.
pub async fn create_dd(
    State(state): State<AppState>,
    Query(params): Query<CreateDdParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreateDdResponse>)> {
    if params.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    check_transaction_type(&state, &params.transaction_type)?;

    let upload = zip_ingest::load_upload(body, IngestLimits::from(&state.config.ingest)).await?;

    let mut dd = DueDiligence::new(
        params.name.trim().to_string(),
        params.owner,
        params.transaction_type,
        params.briefing,
    );
    dd.original_zip_name = params.file_name;
    dd.original_zip_sha256 = Some(upload.archive_sha256.clone());
    db::projects::insert_dd(&state.db, &dd).await?;

    let documents = match zip_ingest::ingest_upload(&state.db, &state.store, dd.id, &upload).await {
        Ok(documents) => documents,
        Err(e) => {
            // Leave no half-ingested DD behind
            tracing::error!(dd_id = %dd.id, error = %e, "Ingest failed, removing DD");
            if let Err(cleanup) = db::projects::delete_dd(&state.db, dd.id).await {
                tracing::warn!(dd_id = %dd.id, error = %cleanup, "DD row cleanup failed");
            }
            if let Err(cleanup) = state.store.remove_dd(dd.id).await {
                tracing::warn!(dd_id = %dd.id, error = %cleanup, "Document cleanup failed");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        dd_id = %dd.id,
        name = %dd.name,
        transaction_type = %dd.transaction_type,
        documents = documents.len(),
        "DD created"
    );
    state.event_bus.emit_lossy(DdEvent::DocumentsIngested {
        dd_id: dd.id,
        documents: documents.len(),
        skipped: upload.skipped.len(),
        timestamp: Utc::now(),
    });

    Ok((
        StatusCode::CREATED,
        Json(CreateDdResponse {
            dd,
            documents: documents.len(),
            skipped: upload.skipped,
        }),
    ))
}

/// GET /dd
pub async fn list_dds(State(state): State<AppState>) -> ApiResult<Json<Vec<DueDiligence>>> {
    Ok(Json(db::projects::list_dds(&state.db).await?))
}

/// GET /dd/:id
pub async fn get_dd(State(state): State<AppState>, Path(dd_id): Path<Uuid>) -> ApiResult<Json<DdDetail>> {
    let dd = require_dd(&state, dd_id).await?;
    let document_count = db::documents::count_documents(&state.db, dd_id).await?;
    let latest_run = db::runs::list_runs(&state.db, dd_id)
        .await?
        .into_iter()
        .max_by_key(|run| run.run_number);

    Ok(Json(DdDetail {
        dd,
        document_count,
        latest_run,
    }))
}

/// PATCH /dd/:id
pub async fn update_dd(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
    Json(request): Json<UpdateDdRequest>,
) -> ApiResult<Json<DueDiligence>> {
    let mut dd = require_dd(&state, dd_id).await?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("name cannot be empty".to_string()));
        }
        dd.name = name.trim().to_string();
    }
    if let Some(owner) = request.owner {
        dd.owner = owner;
    }
    if let Some(briefing) = request.briefing {
        dd.briefing = briefing;
    }
    if let Some(transaction_type) = request.transaction_type {
        check_transaction_type(&state, &transaction_type)?;
        dd.transaction_type = transaction_type;
    }
    dd.updated_at = Utc::now();

    db::projects::update_dd(&state.db, &dd).await?;
    Ok(Json(dd))
}

/// DELETE /dd/:id
///
/// Cascades to every row of the DD and removes its stored files. Refused
/// while a run of the DD is executing.
pub async fn delete_dd(State(state): State<AppState>, Path(dd_id): Path<Uuid>) -> ApiResult<StatusCode> {
    require_dd(&state, dd_id).await?;

    if let Some(run) = db::runs::find_active_run(&state.db, dd_id).await? {
        if state.is_run_executing(run.id).await {
            return Err(ApiError::Conflict(format!(
                "Run {} of this DD is executing; cancel it first",
                run.id
            )));
        }
    }

    db::projects::delete_dd(&state.db, dd_id).await?;
    state.store.remove_dd(dd_id).await?;

    tracing::info!(dd_id = %dd_id, "DD deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/dd", get(list_dds).post(create_dd))
        .route("/dd/:id", get(get_dd).patch(update_dd).delete(delete_dd))
}
