//! Re-upload change detection
//!
//! Matches an existing document set against a new upload by original path,
//! then by SHA-256 to tell modified from unchanged documents.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::models::{ClassificationStatus, Document, DocumentVersion};
use crate::services::document_store::DocumentStore;
use crate::services::zip_ingest::{self, IngestError, PreparedEntry, Upload};

/// Paths grouped by change kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }
}

/// Compare stored documents with upload entries (pure)
pub fn diff(existing: &[Document], entries: &[PreparedEntry]) -> ChangeSet {
    let stored: BTreeMap<&str, &str> = existing
        .iter()
        .map(|d| (d.original_path.as_str(), d.sha256.as_str()))
        .collect();
    let uploaded: BTreeSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();

    let mut changes = ChangeSet::default();
    for entry in entries {
        match stored.get(entry.path.as_str()) {
            None => changes.added.push(entry.path.clone()),
            Some(hash) if *hash == entry.sha256 => changes.unchanged.push(entry.path.clone()),
            Some(_) => changes.modified.push(entry.path.clone()),
        }
    }
    changes.removed = stored
        .keys()
        .filter(|path| !uploaded.contains(*path))
        .map(|path| path.to_string())
        .collect();

    changes.added.sort();
    changes.modified.sort();
    changes.unchanged.sort();
    changes
}

/// Apply a re-upload to a DD and return what changed
pub async fn apply_upload(
    pool: &SqlitePool,
    store: &DocumentStore,
    dd_id: Uuid,
    upload: &Upload,
) -> Result<ChangeSet, IngestError> {
    let existing = db::documents::list_documents(pool, dd_id).await?;
    let changes = diff(&existing, &upload.entries);

    let by_path: BTreeMap<&str, &Document> =
        existing.iter().map(|d| (d.original_path.as_str(), d)).collect();
    let entries: BTreeMap<&str, &PreparedEntry> =
        upload.entries.iter().map(|e| (e.path.as_str(), e)).collect();

    let added: Vec<PreparedEntry> = changes
        .added
        .iter()
        .filter_map(|path| entries.get(path.as_str()).map(|e| (*e).clone()))
        .collect();
    let folders = zip_ingest::create_container_folders(pool, dd_id, &added).await?;
    for entry in &added {
        let folder_id = entry.directory().and_then(|dir| folders.get(dir).copied());
        zip_ingest::insert_entry(pool, store, dd_id, folder_id, entry).await?;
    }

    for path in &changes.modified {
        let (Some(document), Some(entry)) = (by_path.get(path.as_str()), entries.get(path.as_str()))
        else {
            continue;
        };
        replace_content(pool, store, document, entry).await?;
    }

    for path in &changes.removed {
        if let Some(document) = by_path.get(path.as_str()) {
            db::documents::delete_document(pool, document.id).await?;
            store
                .remove_document(dd_id, document.id, &document.storage_path)
                .await?;
        }
    }

    info!(
        dd_id = %dd_id,
        added = changes.added.len(),
        modified = changes.modified.len(),
        removed = changes.removed.len(),
        unchanged = changes.unchanged.len(),
        "Re-upload applied"
    );

    Ok(changes)
}

async fn replace_content(
    pool: &SqlitePool,
    store: &DocumentStore,
    document: &Document,
    entry: &PreparedEntry,
) -> Result<(), IngestError> {
    // Old text must not outlive the old bytes
    store
        .remove_document(document.dd_id, document.id, &document.storage_path)
        .await?;
    let storage_path = zip_ingest::store_entry(store, document.dd_id, document.id, entry).await?;

    let updated = Document {
        size_bytes: entry.bytes.len() as i64,
        sha256: entry.sha256.clone(),
        storage_path,
        mime_type: entry.mime_type.clone(),
        text_status: entry.text_status,
        ai_category: None,
        ai_confidence: None,
        classification_status: ClassificationStatus::Pending,
        version: document.version + 1,
        updated_at: Utc::now(),
        ..document.clone()
    };

    db::documents::update_document_content(pool, &updated).await?;
    db::documents::insert_version(
        pool,
        &DocumentVersion {
            id: Uuid::new_v4(),
            document_id: updated.id,
            version: updated.version,
            sha256: updated.sha256.clone(),
            size_bytes: updated.size_bytes,
            recorded_at: Utc::now(),
        },
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TextStatus;

    fn document(path: &str, sha: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            dd_id: Uuid::nil(),
            folder_id: None,
            original_path: path.to_string(),
            file_name: path.to_string(),
            extension: "txt".to_string(),
            size_bytes: 1,
            sha256: sha.to_string(),
            storage_path: String::new(),
            mime_type: None,
            text_status: TextStatus::Extracted,
            ai_category: None,
            ai_confidence: None,
            classification_status: ClassificationStatus::Classified,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(path: &str, sha: &str) -> PreparedEntry {
        PreparedEntry {
            path: path.to_string(),
            file_name: path.to_string(),
            extension: "txt".to_string(),
            bytes: vec![],
            sha256: sha.to_string(),
            mime_type: None,
            text_status: TextStatus::Empty,
            text: None,
        }
    }

    #[test]
    fn test_diff_classifies_every_path() {
        let existing = vec![document("a.txt", "1"), document("b.txt", "2"), document("c.txt", "3")];
        let entries = vec![entry("a.txt", "1"), entry("b.txt", "changed"), entry("d.txt", "4")];

        let changes = diff(&existing, &entries);
        assert_eq!(changes.unchanged, vec!["a.txt"]);
        assert_eq!(changes.modified, vec!["b.txt"]);
        assert_eq!(changes.added, vec!["d.txt"]);
        assert_eq!(changes.removed, vec!["c.txt"]);
        assert!(changes.has_changes());
    }

    #[test]
    fn test_identical_upload_has_no_changes() {
        let existing = vec![document("a.txt", "1")];
        let changes = diff(&existing, &[entry("a.txt", "1")]);
        assert!(!changes.has_changes());
    }
}
