//! Due diligence project

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A due diligence project: one uploaded data room analysed against a blueprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DueDiligence {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    /// Free-text context passed to every LLM pass
    pub briefing: String,
    /// Blueprint key (e.g. `m_and_a`, `mining`)
    pub transaction_type: String,
    pub original_zip_name: Option<String>,
    pub original_zip_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DueDiligence {
    pub fn new(name: String, owner: String, transaction_type: String, briefing: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            owner,
            briefing,
            transaction_type,
            original_zip_name: None,
            original_zip_sha256: None,
            created_at: now,
            updated_at: now,
        }
    }
}
