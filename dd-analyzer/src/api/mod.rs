//! HTTP API handlers for dd-analyzer
//!
//! REST + SSE. Errors are JSON `{"error": {"code", "message"}}`.

pub mod analysis;
pub mod documents;
pub mod evaluations;
pub mod findings;
pub mod health;
pub mod projects;
pub mod report;
pub mod risks;
pub mod settings;
pub mod sse;

pub use analysis::analysis_routes;
pub use documents::document_routes;
pub use evaluations::evaluation_routes;
pub use findings::finding_routes;
pub use health::health_routes;
pub use projects::project_routes;
pub use report::report_routes;
pub use risks::risk_routes;
pub use settings::settings_routes;
pub use sse::sse_routes;

use uuid::Uuid;

use crate::models::{AnalysisRun, DueDiligence};
use crate::{ApiError, ApiResult, AppState};

/// Load a DD or fail with 404
pub(crate) async fn require_dd(state: &AppState, dd_id: Uuid) -> ApiResult<DueDiligence> {
    crate::db::projects::load_dd(&state.db, dd_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("DD not found: {}", dd_id)))
}

/// Load a run or fail with 404
pub(crate) async fn require_run(state: &AppState, run_id: Uuid) -> ApiResult<AnalysisRun> {
    crate::db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis run not found: {}", run_id)))
}
