//! Processing checkpoint persistence
//!
//! One row per run. Structured fields are JSON columns; every write is an
//! upsert wrapped in `retry_on_lock` because checkpoint saves run concurrently
//! with API reads during per-document passes.

use chrono::Utc;
use dd_common::{Error, PipelineStage, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{parse_timestamp, parse_uuid, ProcessingCheckpoint};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// Insert the initial checkpoint of a run
pub async fn create_checkpoint(pool: &SqlitePool, checkpoint: &ProcessingCheckpoint) -> Result<()> {
    save_checkpoint(pool, checkpoint).await
}

/// Upsert a checkpoint
///
/// Approved gates are merged with the stored set, never replaced: approvals
/// arrive through `add_approved_gate` while the executing run holds an older
/// copy of the checkpoint.
pub async fn save_checkpoint(pool: &SqlitePool, checkpoint: &ProcessingCheckpoint) -> Result<()> {
    // Serialize before touching the database
    let run_id = checkpoint.run_id.to_string();
    let dd_id = checkpoint.dd_id.to_string();
    let current_stage = checkpoint.current_stage.as_str();
    let completed_stages = serde_json::to_string(&checkpoint.completed_stages)?;
    let stage_progress = serde_json::to_string(&checkpoint.stage_progress)?;
    let approved_gates = serde_json::to_string(&checkpoint.approved_gates)?;
    let pass_results = serde_json::to_string(&checkpoint.pass_results)?;
    let error_stage = checkpoint.error_stage.map(|s| s.as_str());
    let error_message = checkpoint.error_message.clone();
    let retry_count = checkpoint.retry_count as i64;
    let updated_at = Utc::now().to_rfc3339();

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("save_checkpoint", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO dd_processing_checkpoints (
                run_id, dd_id, current_stage, completed_stages, stage_progress,
                approved_gates, pass_results, error_stage, error_message,
                retry_count, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                current_stage = excluded.current_stage,
                completed_stages = excluded.completed_stages,
                stage_progress = excluded.stage_progress,
                approved_gates = (
                    SELECT json_group_array(value) FROM (
                        SELECT value FROM json_each(dd_processing_checkpoints.approved_gates)
                        UNION
                        SELECT value FROM json_each(?)
                    )
                ),
                pass_results = excluded.pass_results,
                error_stage = excluded.error_stage,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&run_id)
        .bind(&dd_id)
        .bind(current_stage)
        .bind(&completed_stages)
        .bind(&stage_progress)
        .bind(&approved_gates)
        .bind(&pass_results)
        .bind(error_stage)
        .bind(&error_message)
        .bind(retry_count)
        .bind(&updated_at)
        .bind(&approved_gates)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok::<(), Error>(())
    })
    .await
}

/// Approve a review gate without touching the rest of the checkpoint
///
/// Returns false when the run has no checkpoint.
pub async fn add_approved_gate(pool: &SqlitePool, run_id: Uuid, gate: PipelineStage) -> Result<bool> {
    let run_id = run_id.to_string();
    let updated_at = Utc::now().to_rfc3339();
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("add_approved_gate", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE dd_processing_checkpoints
            SET approved_gates = (
                    SELECT json_group_array(value) FROM (
                        SELECT value FROM json_each(dd_processing_checkpoints.approved_gates)
                        UNION
                        SELECT ?
                    )
                ),
                updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(gate.as_str())
        .bind(&updated_at)
        .bind(&run_id)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok::<bool, Error>(result.rows_affected() > 0)
    })
    .await
}

/// Approved gates as currently stored
pub async fn load_approved_gates(pool: &SqlitePool, run_id: Uuid) -> Result<BTreeSet<PipelineStage>> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT approved_gates FROM dd_processing_checkpoints WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(pool)
            .await?;

    match stored {
        Some(json) => from_json(&json, "approved_gates"),
        None => Ok(BTreeSet::new()),
    }
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

pub async fn load_checkpoint(pool: &SqlitePool, run_id: Uuid) -> Result<Option<ProcessingCheckpoint>> {
    let row = sqlx::query("SELECT * FROM dd_processing_checkpoints WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ProcessingCheckpoint {
        run_id: parse_uuid(row.get("run_id"), "run_id")?,
        dd_id: parse_uuid(row.get("dd_id"), "dd_id")?,
        current_stage: row.get::<&str, _>("current_stage").parse()?,
        completed_stages: from_json(row.get("completed_stages"), "completed_stages")?,
        stage_progress: from_json(row.get("stage_progress"), "stage_progress")?,
        approved_gates: from_json(row.get("approved_gates"), "approved_gates")?,
        pass_results: from_json(row.get("pass_results"), "pass_results")?,
        error_stage: row
            .get::<Option<&str>, _>("error_stage")
            .map(str::parse::<PipelineStage>)
            .transpose()?,
        error_message: row.get("error_message"),
        retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
    }))
}
