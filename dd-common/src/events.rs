//! Event types for the DD event system
//!
//! Provides the shared event definitions and the EventBus used to fan pipeline
//! progress out to SSE clients.

use crate::stages::PipelineStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// DD event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DdEvent {
    /// ZIP upload stored and text-extracted
    DocumentsIngested {
        dd_id: Uuid,
        documents: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// New analysis run started from the first stage
    AnalysisStarted {
        dd_id: Uuid,
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Existing run resumed from its checkpoint
    AnalysisResumed {
        dd_id: Uuid,
        run_id: Uuid,
        from_stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    StageStarted {
        run_id: Uuid,
        stage: PipelineStage,
        total_items: usize,
        timestamp: DateTime<Utc>,
    },

    /// Per-item progress within a stage
    StageProgress {
        run_id: Uuid,
        stage: PipelineStage,
        completed: usize,
        total: usize,
        /// Overall run progress (0.0 - 100.0)
        percent: f64,
        timestamp: DateTime<Utc>,
    },

    StageCompleted {
        run_id: Uuid,
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    /// Run paused at a review gate
    AwaitingReview {
        run_id: Uuid,
        gate: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    AnalysisCompleted {
        dd_id: Uuid,
        run_id: Uuid,
        findings: usize,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    AnalysisFailed {
        dd_id: Uuid,
        run_id: Uuid,
        stage: PipelineStage,
        error: String,
        timestamp: DateTime<Utc>,
    },

    AnalysisCancelled {
        dd_id: Uuid,
        run_id: Uuid,
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },
}

impl DdEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            DdEvent::DocumentsIngested { .. } => "DocumentsIngested",
            DdEvent::AnalysisStarted { .. } => "AnalysisStarted",
            DdEvent::AnalysisResumed { .. } => "AnalysisResumed",
            DdEvent::StageStarted { .. } => "StageStarted",
            DdEvent::StageProgress { .. } => "StageProgress",
            DdEvent::StageCompleted { .. } => "StageCompleted",
            DdEvent::AwaitingReview { .. } => "AwaitingReview",
            DdEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            DdEvent::AnalysisFailed { .. } => "AnalysisFailed",
            DdEvent::AnalysisCancelled { .. } => "AnalysisCancelled",
        }
    }

    /// Run the event belongs to, if any
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            DdEvent::DocumentsIngested { .. } => None,
            DdEvent::AnalysisStarted { run_id, .. }
            | DdEvent::AnalysisResumed { run_id, .. }
            | DdEvent::StageStarted { run_id, .. }
            | DdEvent::StageProgress { run_id, .. }
            | DdEvent::StageCompleted { run_id, .. }
            | DdEvent::AwaitingReview { run_id, .. }
            | DdEvent::AnalysisCompleted { run_id, .. }
            | DdEvent::AnalysisFailed { run_id, .. }
            | DdEvent::AnalysisCancelled { run_id, .. } => Some(*run_id),
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow subscribers
/// observe `Lagged` and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DdEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DdEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DdEvent) -> Result<usize, broadcast::error::SendError<DdEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: DdEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
