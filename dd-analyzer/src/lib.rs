//! dd-analyzer library interface
//!
//! Exposes the router, state and services for the binary and the
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use dd_common::config::TomlConfig;
use dd_common::events::EventBus;
use dd_common::PipelineStage;

use crate::pipeline::{PipelineOrchestrator, RunOutcome};
use crate::services::{BlueprintRegistry, DocumentStore, LlmProvider};

/// Shared, swappable LLM provider (replaced when the API key changes)
pub type SharedLlm = Arc<RwLock<Option<Arc<dyn LlmProvider>>>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// `None` until an API key is configured
    pub llm: SharedLlm,
    pub blueprints: Arc<BlueprintRegistry>,
    pub store: DocumentStore,
    pub config: Arc<TomlConfig>,
    /// TOML file the API key is mirrored to
    pub config_path: PathBuf,
    /// Cancellation tokens of executing runs
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        blueprints: Arc<BlueprintRegistry>,
        store: DocumentStore,
        config: TomlConfig,
        config_path: PathBuf,
    ) -> Self {
        Self {
            db,
            event_bus,
            llm: Arc::new(RwLock::new(None)),
            blueprints,
            store,
            config: Arc::new(config),
            config_path,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_llm(self, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            llm: Arc::new(RwLock::new(llm)),
            ..self
        }
    }

    pub async fn llm_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.llm.read().await.clone()
    }

    pub async fn set_llm_provider(&self, llm: Arc<dyn LlmProvider>) {
        *self.llm.write().await = Some(llm);
    }

    pub async fn is_run_executing(&self, run_id: Uuid) -> bool {
        self.cancellation_tokens.read().await.contains_key(&run_id)
    }

    /// Execute a run in the background
    ///
    /// Fails with 503 when no LLM is configured and 409 when the run is
    /// already executing in this process.
    pub async fn launch_run(&self, run_id: Uuid) -> ApiResult<()> {
        let llm = self.llm_provider().await.ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "LLM API key not configured (POST /api/settings/llm_api_key)".to_string(),
            )
        })?;

        let cancel_token = CancellationToken::new();
        {
            let mut tokens = self.cancellation_tokens.write().await;
            if tokens.contains_key(&run_id) {
                return Err(ApiError::Conflict(format!("Run {} is already executing", run_id)));
            }
            tokens.insert(run_id, cancel_token.clone());
        }

        let orchestrator = PipelineOrchestrator::new(
            self.db.clone(),
            self.event_bus.clone(),
            Some(llm),
            Arc::clone(&self.blueprints),
            self.store.clone(),
            self.config.pipeline.clone(),
        );
        let state = self.clone();

        tokio::spawn(async move {
            tracing::info!(run_id = %run_id, "Background analysis task started");
            let mut cancel_token = cancel_token;

            loop {
                let paused_at = match orchestrator.execute(run_id, cancel_token).await {
                    Ok(RunOutcome::Failed { stage, error }) => {
                        *state.last_error.write().await = Some(format!("{} failed: {}", stage, error));
                        None
                    }
                    Ok(RunOutcome::AwaitingReview { gate }) => {
                        tracing::info!(run_id = %run_id, gate = %gate, "Background analysis task paused");
                        Some(gate)
                    }
                    Ok(outcome) => {
                        tracing::info!(run_id = %run_id, outcome = ?outcome, "Background analysis task finished");
                        None
                    }
                    Err(e) => {
                        tracing::error!(run_id = %run_id, error = %e, "Analysis run could not be executed");
                        *state.last_error.write().await = Some(e.to_string());
                        None
                    }
                };

                state.cancellation_tokens.write().await.remove(&run_id);

                // An approval that arrived while the run was pausing found it
                // still executing and did not resume it
                let Some(gate) = paused_at else { break };
                match state.resume_if_approved(run_id, gate).await {
                    Some(token) => cancel_token = token,
                    None => break,
                }
            }
        });

        Ok(())
    }

    /// Re-register a paused run whose gate has been approved in the meantime
    ///
    /// Returns None when the gate is still unapproved or another launch
    /// already picked the run up.
    async fn resume_if_approved(&self, run_id: Uuid, gate: PipelineStage) -> Option<CancellationToken> {
        match db::checkpoints::load_approved_gates(&self.db, run_id).await {
            Ok(gates) if gates.contains(&gate) => {}
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to reload gate approvals");
                return None;
            }
        }

        let token = CancellationToken::new();
        let mut tokens = self.cancellation_tokens.write().await;
        if tokens.contains_key(&run_id) {
            return None;
        }
        tokens.insert(run_id, token.clone());
        tracing::info!(run_id = %run_id, gate = %gate, "Gate approved while pausing, continuing run");
        Some(token)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        .merge(api::health_routes())
        .merge(api::project_routes())
        .merge(api::document_routes())
        .merge(api::risk_routes())
        .merge(api::analysis_routes())
        .merge(api::finding_routes())
        .merge(api::report_routes())
        .merge(api::evaluation_routes())
        .merge(api::settings_routes())
        .merge(api::sse_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
