//! Analysis runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum RunStatus {
        Pending => "pending",
        Running => "running",
        /// Paused at a review gate
        AwaitingReview => "awaiting_review",
        /// Process stopped while the run was executing
        Interrupted => "interrupted",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RunStatus {
    /// Blocks another run of the same DD from starting
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunStatus::Pending | RunStatus::Running | RunStatus::AwaitingReview
        )
    }

    /// Can be continued from its checkpoint
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            RunStatus::Interrupted | RunStatus::Failed | RunStatus::AwaitingReview | RunStatus::Cancelled
        )
    }
}

/// One analysis attempt of a DD
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub dd_id: Uuid,
    /// 1-based, increasing per DD
    pub run_number: i64,
    pub status: RunStatus,
    pub blueprint: String,
    pub review_gates: bool,
    pub findings_count: i64,
    /// Report JSON written by the store stage
    pub report: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AnalysisRun {
    pub fn new(dd_id: Uuid, run_number: i64, blueprint: String, review_gates: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            dd_id,
            run_number,
            status: RunStatus::Pending,
            blueprint,
            review_gates,
            findings_count: 0,
            report: None,
            error_message: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}
