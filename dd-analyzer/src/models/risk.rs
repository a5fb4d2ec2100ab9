//! Perspective risks and findings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    /// Finding severity, ordered from least to most severe
    pub enum Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

impl Severity {
    /// Weight used by the aggregate risk score
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 3.0,
            Severity::High => 7.0,
            Severity::Critical => 12.0,
        }
    }

    /// High and critical findings are verified in pass 7
    pub fn needs_verification(self) -> bool {
        self >= Severity::High
    }

    /// Lenient parse for model output ("HIGH", "Severe", ...)
    pub fn from_model_output(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "severe" | "blocker" => Severity::Critical,
            "high" | "major" => Severity::High,
            "low" | "minor" | "info" | "informational" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

string_enum! {
    pub enum FindingType {
        Risk => "risk",
        CrossDocument => "cross_document",
        MissingDocument => "missing_document",
        Financial => "financial",
    }
}

string_enum! {
    /// Outcome of pass 7 verification
    pub enum VerificationStatus {
        Unverified => "unverified",
        Verified => "verified",
        Disputed => "disputed",
    }
}

string_enum! {
    /// Reviewer disposition of a finding
    pub enum ReviewStatus {
        Open => "open",
        Confirmed => "confirmed",
        Dismissed => "dismissed",
        Resolved => "resolved",
    }
}

/// User-defined risk question asked of every document of a DD
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerspectiveRisk {
    pub id: Uuid,
    pub dd_id: Uuid,
    pub title: String,
    pub query: String,
    pub category: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl PerspectiveRisk {
    pub fn new(dd_id: Uuid, title: String, query: String, category: String, created_by: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            dd_id,
            title,
            query,
            category,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Persisted finding of an analysis run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: Uuid,
    pub dd_id: Uuid,
    pub run_id: Uuid,
    pub perspective_risk_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub category: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub finding_type: FindingType,
    pub clause_reference: Option<String>,
    pub confidence: f64,
    pub verification_status: VerificationStatus,
    pub status: ReviewStatus,
    pub reviewer_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Earlier finding this one repeats
    pub duplicate_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
