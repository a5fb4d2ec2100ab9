//! Folders, documents and document versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    /// Outcome of text extraction for a stored document
    pub enum TextStatus {
        Extracted => "extracted",
        /// Format without a text extractor (PDF, images, ...)
        Unsupported => "unsupported",
        Empty => "empty",
        Failed => "failed",
    }
}

string_enum! {
    pub enum ClassificationStatus {
        Pending => "pending",
        /// Confidence at or above the auto-accept threshold
        Classified => "classified",
        /// Confidence between review floor and auto-accept
        NeedsReview => "needs_review",
        /// Routed to the blueprint fallback folder
        Unclassified => "unclassified",
        /// Set by a reviewer
        Manual => "manual",
    }
}

/// Folder in a DD data room
///
/// Standard folders come from the blueprint; container folders mirror the
/// directory structure of the uploaded ZIP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Folder {
    pub id: Uuid,
    pub dd_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    /// Slash-separated path, unique per DD
    pub path: String,
    pub is_standard: bool,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    pub fn new(dd_id: Uuid, parent_id: Option<Uuid>, name: &str, path: &str, is_standard: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            dd_id,
            parent_id,
            name: name.to_string(),
            path: path.to_string(),
            is_standard,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub dd_id: Uuid,
    pub folder_id: Option<Uuid>,
    /// Path inside the uploaded ZIP, unique per DD
    pub original_path: String,
    pub file_name: String,
    /// Lower-case extension without the dot
    pub extension: String,
    pub size_bytes: i64,
    pub sha256: String,
    /// Location of the stored bytes, relative to the documents directory
    pub storage_path: String,
    pub mime_type: Option<String>,
    pub text_status: TextStatus,
    /// Blueprint folder chosen by the classifier
    pub ai_category: Option<String>,
    pub ai_confidence: Option<f64>,
    pub classification_status: ClassificationStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn has_text(&self) -> bool {
        self.text_status == TextStatus::Extracted
    }
}

/// One stored revision of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i64,
    pub sha256: String,
    pub size_bytes: i64,
    pub recorded_at: DateTime<Utc>,
}
