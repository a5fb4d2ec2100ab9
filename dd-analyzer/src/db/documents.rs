//! Folder, document and document version queries

use chrono::Utc;
use dd_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    parse_timestamp, parse_uuid, ClassificationStatus, Document, DocumentVersion, Folder,
};

fn parse_optional_uuid(value: Option<&str>, column: &str) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(v, column)).transpose()
}

fn row_to_folder(row: &SqliteRow) -> Result<Folder> {
    Ok(Folder {
        id: parse_uuid(row.get("id"), "folders.id")?,
        dd_id: parse_uuid(row.get("dd_id"), "folders.dd_id")?,
        parent_id: parse_optional_uuid(row.get("parent_id"), "folders.parent_id")?,
        name: row.get("name"),
        path: row.get("path"),
        is_standard: row.get::<i64, _>("is_standard") != 0,
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: parse_uuid(row.get("id"), "documents.id")?,
        dd_id: parse_uuid(row.get("dd_id"), "documents.dd_id")?,
        folder_id: parse_optional_uuid(row.get("folder_id"), "documents.folder_id")?,
        original_path: row.get("original_path"),
        file_name: row.get("file_name"),
        extension: row.get("extension"),
        size_bytes: row.get("size_bytes"),
        sha256: row.get("sha256"),
        storage_path: row.get("storage_path"),
        mime_type: row.get("mime_type"),
        text_status: row.get::<&str, _>("text_status").parse()?,
        ai_category: row.get("ai_category"),
        ai_confidence: row.get("ai_confidence"),
        classification_status: row.get::<&str, _>("classification_status").parse()?,
        version: row.get("version"),
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
    })
}

// ============================================================================
// Folders
// ============================================================================

/// Return the folder at `path`, creating it when missing
///
/// Standard and container folders are separate namespaces: a ZIP directory
/// named like a blueprint folder does not stand in for it.
pub async fn get_or_create_folder(
    pool: &SqlitePool,
    dd_id: Uuid,
    parent_id: Option<Uuid>,
    name: &str,
    path: &str,
    is_standard: bool,
) -> Result<Folder> {
    let candidate = Folder::new(dd_id, parent_id, name, path, is_standard);

    sqlx::query(
        r#"
        INSERT INTO folders (id, dd_id, parent_id, name, path, is_standard, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(dd_id, is_standard, path) DO NOTHING
        "#,
    )
    .bind(candidate.id.to_string())
    .bind(dd_id.to_string())
    .bind(parent_id.map(|id| id.to_string()))
    .bind(&candidate.name)
    .bind(&candidate.path)
    .bind(is_standard as i64)
    .bind(candidate.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM folders WHERE dd_id = ? AND is_standard = ? AND path = ?")
        .bind(dd_id.to_string())
        .bind(is_standard as i64)
        .bind(path)
        .fetch_one(pool)
        .await?;

    row_to_folder(&row)
}

pub async fn list_folders(pool: &SqlitePool, dd_id: Uuid) -> Result<Vec<Folder>> {
    let rows = sqlx::query("SELECT * FROM folders WHERE dd_id = ? ORDER BY is_standard DESC, path")
        .bind(dd_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_folder).collect()
}

// ============================================================================
// Documents
// ============================================================================

pub async fn insert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (
            id, dd_id, folder_id, original_path, file_name, extension, size_bytes,
            sha256, storage_path, mime_type, text_status, ai_category, ai_confidence,
            classification_status, version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(doc.id.to_string())
    .bind(doc.dd_id.to_string())
    .bind(doc.folder_id.map(|id| id.to_string()))
    .bind(&doc.original_path)
    .bind(&doc.file_name)
    .bind(&doc.extension)
    .bind(doc.size_bytes)
    .bind(&doc.sha256)
    .bind(&doc.storage_path)
    .bind(&doc.mime_type)
    .bind(doc.text_status.as_str())
    .bind(&doc.ai_category)
    .bind(doc.ai_confidence)
    .bind(doc.classification_status.as_str())
    .bind(doc.version)
    .bind(doc.created_at.to_rfc3339())
    .bind(doc.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_document(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Documents of a DD ordered by original path
pub async fn list_documents(pool: &SqlitePool, dd_id: Uuid) -> Result<Vec<Document>> {
    let rows = sqlx::query("SELECT * FROM documents WHERE dd_id = ? ORDER BY original_path")
        .bind(dd_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_document).collect()
}

pub async fn count_documents(pool: &SqlitePool, dd_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE dd_id = ?")
        .bind(dd_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Record the classifier (or reviewer) decision for a document
pub async fn update_classification(
    pool: &SqlitePool,
    doc_id: Uuid,
    folder_id: Option<Uuid>,
    category: Option<&str>,
    confidence: Option<f64>,
    status: ClassificationStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE documents
        SET folder_id = ?, ai_category = ?, ai_confidence = ?,
            classification_status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(folder_id.map(|id| id.to_string()))
    .bind(category)
    .bind(confidence)
    .bind(status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(doc_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace stored content fields after a re-upload
pub async fn update_document_content(pool: &SqlitePool, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE documents
        SET size_bytes = ?, sha256 = ?, storage_path = ?, mime_type = ?, text_status = ?,
            ai_category = ?, ai_confidence = ?, classification_status = ?, version = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(doc.size_bytes)
    .bind(&doc.sha256)
    .bind(&doc.storage_path)
    .bind(&doc.mime_type)
    .bind(doc.text_status.as_str())
    .bind(&doc.ai_category)
    .bind(doc.ai_confidence)
    .bind(doc.classification_status.as_str())
    .bind(doc.version)
    .bind(Utc::now().to_rfc3339())
    .bind(doc.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_document(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Versions
// ============================================================================

pub async fn insert_version(pool: &SqlitePool, version: &DocumentVersion) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO document_versions (id, document_id, version, sha256, size_bytes, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(version.id.to_string())
    .bind(version.document_id.to_string())
    .bind(version.version)
    .bind(&version.sha256)
    .bind(version.size_bytes)
    .bind(version.recorded_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_versions(pool: &SqlitePool, document_id: Uuid) -> Result<Vec<DocumentVersion>> {
    let rows = sqlx::query(
        "SELECT * FROM document_versions WHERE document_id = ? ORDER BY version",
    )
    .bind(document_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(DocumentVersion {
                id: parse_uuid(row.get("id"), "document_versions.id")?,
                document_id: parse_uuid(row.get("document_id"), "document_versions.document_id")?,
                version: row.get("version"),
                sha256: row.get("sha256"),
                size_bytes: row.get("size_bytes"),
                recorded_at: parse_timestamp(row.get("recorded_at"), "recorded_at")?,
            })
        })
        .collect()
}
