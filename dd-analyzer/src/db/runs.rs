//! Analysis run queries

use chrono::Utc;
use dd_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{parse_timestamp, parse_uuid, AnalysisRun, RunStatus};

fn row_to_run(row: &SqliteRow) -> Result<AnalysisRun> {
    let report: Option<serde_json::Value> = row
        .get::<Option<&str>, _>("report")
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize report: {}", e)))?;

    Ok(AnalysisRun {
        id: parse_uuid(row.get("id"), "dd_analysis_runs.id")?,
        dd_id: parse_uuid(row.get("dd_id"), "dd_analysis_runs.dd_id")?,
        run_number: row.get("run_number"),
        status: row.get::<&str, _>("status").parse()?,
        blueprint: row.get("blueprint"),
        review_gates: row.get::<i64, _>("review_gates") != 0,
        findings_count: row.get("findings_count"),
        report,
        error_message: row.get("error_message"),
        started_at: parse_timestamp(row.get("started_at"), "started_at")?,
        ended_at: row
            .get::<Option<&str>, _>("ended_at")
            .map(|v| parse_timestamp(v, "ended_at"))
            .transpose()?,
    })
}

/// Next run number of a DD (1 for the first run)
pub async fn next_run_number(pool: &SqlitePool, dd_id: Uuid) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(run_number) FROM dd_analysis_runs WHERE dd_id = ?")
            .bind(dd_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(max.unwrap_or(0) + 1)
}

pub async fn insert_run(pool: &SqlitePool, run: &AnalysisRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dd_analysis_runs (
            id, dd_id, run_number, status, blueprint, review_gates,
            findings_count, report, error_message, started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.id.to_string())
    .bind(run.dd_id.to_string())
    .bind(run.run_number)
    .bind(run.status.as_str())
    .bind(&run.blueprint)
    .bind(run.review_gates as i64)
    .bind(run.findings_count)
    .bind(run.report.as_ref().map(|r| r.to_string()))
    .bind(&run.error_message)
    .bind(run.started_at.to_rfc3339())
    .bind(run.ended_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_run(pool: &SqlitePool, id: Uuid) -> Result<Option<AnalysisRun>> {
    let row = sqlx::query("SELECT * FROM dd_analysis_runs WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_run).transpose()
}

/// Runs of a DD, latest first
pub async fn list_runs(pool: &SqlitePool, dd_id: Uuid) -> Result<Vec<AnalysisRun>> {
    let rows = sqlx::query(
        "SELECT * FROM dd_analysis_runs WHERE dd_id = ? ORDER BY run_number DESC",
    )
    .bind(dd_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_run).collect()
}

/// Run of a DD that blocks a new start (pending, running or awaiting review)
pub async fn find_active_run(pool: &SqlitePool, dd_id: Uuid) -> Result<Option<AnalysisRun>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM dd_analysis_runs
        WHERE dd_id = ? AND status IN ('pending', 'running', 'awaiting_review')
        ORDER BY run_number DESC
        LIMIT 1
        "#,
    )
    .bind(dd_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_run).transpose()
}

pub async fn list_runs_with_status(pool: &SqlitePool, status: RunStatus) -> Result<Vec<AnalysisRun>> {
    let rows = sqlx::query("SELECT * FROM dd_analysis_runs WHERE status = ? ORDER BY started_at")
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_run).collect()
}

/// Update status; terminal statuses also stamp `ended_at`
pub async fn update_run_status(
    pool: &SqlitePool,
    id: Uuid,
    status: RunStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let ended_at = matches!(
        status,
        RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
    )
    .then(|| Utc::now().to_rfc3339());

    sqlx::query(
        "UPDATE dd_analysis_runs SET status = ?, error_message = ?, ended_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(ended_at)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Store stage output
pub async fn set_run_results(
    pool: &SqlitePool,
    id: Uuid,
    findings_count: i64,
    report: &serde_json::Value,
) -> Result<()> {
    sqlx::query("UPDATE dd_analysis_runs SET findings_count = ?, report = ? WHERE id = ?")
        .bind(findings_count)
        .bind(report.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Flag runs a previous process left `running` as `interrupted`
///
/// Called once at startup before the server accepts requests.
pub async fn mark_running_as_interrupted(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM dd_analysis_runs WHERE status IN ('running', 'pending')")
            .fetch_all(pool)
            .await?;

    sqlx::query(
        "UPDATE dd_analysis_runs SET status = 'interrupted' WHERE status IN ('running', 'pending')",
    )
    .execute(pool)
    .await?;

    ids.iter()
        .map(|id| parse_uuid(id, "dd_analysis_runs.id"))
        .collect()
}
