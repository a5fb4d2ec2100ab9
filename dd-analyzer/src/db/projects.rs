//! Due diligence project queries

use chrono::Utc;
use dd_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{parse_timestamp, parse_uuid, DueDiligence};

fn row_to_dd(row: &SqliteRow) -> Result<DueDiligence> {
    Ok(DueDiligence {
        id: parse_uuid(row.get("id"), "due_diligences.id")?,
        name: row.get("name"),
        owner: row.get("owner"),
        briefing: row.get("briefing"),
        transaction_type: row.get("transaction_type"),
        original_zip_name: row.get("original_zip_name"),
        original_zip_sha256: row.get("original_zip_sha256"),
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
    })
}

pub async fn insert_dd(pool: &SqlitePool, dd: &DueDiligence) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO due_diligences (
            id, name, owner, briefing, transaction_type,
            original_zip_name, original_zip_sha256, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(dd.id.to_string())
    .bind(&dd.name)
    .bind(&dd.owner)
    .bind(&dd.briefing)
    .bind(&dd.transaction_type)
    .bind(&dd.original_zip_name)
    .bind(&dd.original_zip_sha256)
    .bind(dd.created_at.to_rfc3339())
    .bind(dd.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_dd(pool: &SqlitePool, id: Uuid) -> Result<Option<DueDiligence>> {
    let row = sqlx::query("SELECT * FROM due_diligences WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_dd).transpose()
}

/// All projects, newest first
pub async fn list_dds(pool: &SqlitePool) -> Result<Vec<DueDiligence>> {
    let rows = sqlx::query("SELECT * FROM due_diligences ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_dd).collect()
}

/// Persist editable fields (name, owner, briefing, transaction type, ZIP info)
pub async fn update_dd(pool: &SqlitePool, dd: &DueDiligence) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE due_diligences
        SET name = ?, owner = ?, briefing = ?, transaction_type = ?,
            original_zip_name = ?, original_zip_sha256 = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&dd.name)
    .bind(&dd.owner)
    .bind(&dd.briefing)
    .bind(&dd.transaction_type)
    .bind(&dd.original_zip_name)
    .bind(&dd.original_zip_sha256)
    .bind(Utc::now().to_rfc3339())
    .bind(dd.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a project; dependent rows go with it via ON DELETE CASCADE
pub async fn delete_dd(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM due_diligences WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
