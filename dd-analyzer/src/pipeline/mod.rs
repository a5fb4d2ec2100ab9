//! Analysis pipeline
//!
//! A run walks the stage registry in order. Progress and intermediate results
//! live in the run's checkpoint so an interrupted, failed or paused run picks
//! up where it stopped.

pub mod analytics;
pub mod orchestrator;
pub mod prompts;
pub mod resume;

pub use orchestrator::{PipelineOrchestrator, RunOutcome};
pub use resume::ResumePlan;

use dd_common::PipelineStage;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{BlueprintError, LlmError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Run {0} has already completed every stage")]
    AlreadyComplete(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("No checkpoint for run {0}")]
    CheckpointMissing(Uuid),

    #[error("No LLM provider configured")]
    LlmUnavailable,

    #[error("{0}")]
    Invalid(String),

    #[error("Stage {stage} failed: {source}")]
    Llm {
        stage: PipelineStage,
        #[source]
        source: LlmError,
    },

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    Common(#[from] dd_common::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Common(err.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
