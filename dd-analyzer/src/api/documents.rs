//! Document and folder handlers
//!
//! POST|GET /dd/:id/documents, PATCH /dd/:id/documents/:doc_id,
//! GET /dd/:id/documents/:doc_id/versions, GET /dd/:id/folders

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use dd_common::events::DdEvent;

use super::require_dd;
use crate::db;
use crate::models::{Document, DocumentVersion, Folder};
use crate::services::change_detector::{self, ChangeSet};
use crate::services::zip_ingest::{self, IngestLimits};
use crate::services::Classifier;
use crate::{ApiError, ApiResult, AppState};

/// PATCH /dd/:id/documents/:doc_id request
#[derive(Debug, Deserialize)]
pub struct ReclassifyRequest {
    /// Blueprint folder name
    pub folder: String,
}

async fn require_document(state: &AppState, dd_id: Uuid, doc_id: Uuid) -> ApiResult<Document> {
    db::documents::load_document(&state.db, doc_id)
        .await?
        .filter(|doc| doc.dd_id == dd_id)
        .ok_or_else(|| ApiError::NotFound(format!("Document not found: {}", doc_id)))
}

/// POST /dd/:id/documents
///
/// Re-upload of the data room. Returns what was added, removed, modified
/// and left unchanged.
pub async fn upload_documents(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<ChangeSet>> {
    let mut dd = require_dd(&state, dd_id).await?;

    if let Some(run) = db::runs::find_active_run(&state.db, dd_id).await? {
        if state.is_run_executing(run.id).await {
            return Err(ApiError::Conflict(format!(
                "Run {} of this DD is executing; documents cannot change",
                run.id
            )));
        }
    }

    let upload = zip_ingest::load_upload(body, IngestLimits::from(&state.config.ingest)).await?;
    let changes = change_detector::apply_upload(&state.db, &state.store, dd_id, &upload).await?;

    dd.original_zip_sha256 = Some(upload.archive_sha256.clone());
    dd.updated_at = Utc::now();
    db::projects::update_dd(&state.db, &dd).await?;

    tracing::info!(
        dd_id = %dd_id,
        added = changes.added.len(),
        removed = changes.removed.len(),
        modified = changes.modified.len(),
        unchanged = changes.unchanged.len(),
        "Documents re-uploaded"
    );
    if changes.has_changes() {
        state.event_bus.emit_lossy(DdEvent::DocumentsIngested {
            dd_id,
            documents: changes.added.len() + changes.modified.len(),
            skipped: upload.skipped.len(),
            timestamp: Utc::now(),
        });
    }

    Ok(Json(changes))
}

/// GET /dd/:id/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Document>>> {
    require_dd(&state, dd_id).await?;
    Ok(Json(db::documents::list_documents(&state.db, dd_id).await?))
}

/// PATCH /dd/:id/documents/:doc_id
///
/// Manual reclassification into a folder of the DD's blueprint.
pub async fn reclassify_document(
    State(state): State<AppState>,
    Path((dd_id, doc_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ReclassifyRequest>,
) -> ApiResult<Json<Document>> {
    let dd = require_dd(&state, dd_id).await?;
    require_document(&state, dd_id, doc_id).await?;

    let blueprint = state.blueprints.get(&dd.transaction_type)?;
    if !blueprint.folders.iter().any(|f| f.name == request.folder) {
        return Err(ApiError::BadRequest(format!(
            "Folder '{}' is not part of blueprint '{}'",
            request.folder, blueprint.key
        )));
    }

    let decision = Classifier::manual(&request.folder);
    let folder = db::documents::get_or_create_folder(
        &state.db,
        dd_id,
        None,
        &decision.folder,
        &decision.folder,
        true,
    )
    .await?;
    db::documents::update_classification(
        &state.db,
        doc_id,
        Some(folder.id),
        Some(&decision.folder),
        Some(decision.confidence),
        decision.status,
    )
    .await?;

    tracing::info!(dd_id = %dd_id, document_id = %doc_id, folder = %decision.folder, "Document reclassified");
    Ok(Json(require_document(&state, dd_id, doc_id).await?))
}

/// GET /dd/:id/documents/:doc_id/versions
pub async fn list_versions(
    State(state): State<AppState>,
    Path((dd_id, doc_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<DocumentVersion>>> {
    require_document(&state, dd_id, doc_id).await?;
    Ok(Json(db::documents::list_versions(&state.db, doc_id).await?))
}

/// GET /dd/:id/folders
pub async fn list_folders(
    State(state): State<AppState>,
    Path(dd_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Folder>>> {
    require_dd(&state, dd_id).await?;
    Ok(Json(db::documents::list_folders(&state.db, dd_id).await?))
}

pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/dd/:id/documents", get(list_documents).post(upload_documents))
        .route("/dd/:id/documents/:doc_id", patch(reclassify_document))
        .route("/dd/:id/documents/:doc_id/versions", get(list_versions))
        .route("/dd/:id/folders", get(list_folders))
}
