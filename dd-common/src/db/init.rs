//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date. Every
//! `create_*_table` function is idempotent (`CREATE TABLE IF NOT EXISTS`), so
//! startup can call them unconditionally.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Foreign keys and WAL must be set per connection, so they go on the
    // connect options rather than a one-off PRAGMA.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_due_diligences_table(pool).await?;
    create_folders_table(pool).await?;
    create_documents_table(pool).await?;
    create_document_versions_table(pool).await?;
    create_perspective_risks_table(pool).await?;
    create_analysis_runs_table(pool).await?;
    create_processing_checkpoints_table(pool).await?;
    create_findings_table(pool).await?;
    create_eval_rubrics_table(pool).await?;
    create_evaluations_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_due_diligences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS due_diligences (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner TEXT NOT NULL,
            briefing TEXT NOT NULL DEFAULT '',
            transaction_type TEXT NOT NULL,
            original_zip_name TEXT,
            original_zip_sha256 TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_folders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folders (
            id TEXT PRIMARY KEY,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            parent_id TEXT REFERENCES folders(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            is_standard INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (dd_id, is_standard, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_documents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            folder_id TEXT REFERENCES folders(id) ON DELETE SET NULL,
            original_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            extension TEXT NOT NULL DEFAULT '',
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            mime_type TEXT,
            text_status TEXT NOT NULL,
            ai_category TEXT,
            ai_confidence REAL,
            classification_status TEXT NOT NULL DEFAULT 'pending',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (dd_id, original_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_dd ON documents(dd_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_document_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            version INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (document_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_perspective_risks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS perspective_risks (
            id TEXT PRIMARY KEY,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            query TEXT NOT NULL,
            category TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_analysis_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dd_analysis_runs (
            id TEXT PRIMARY KEY,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            run_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            blueprint TEXT NOT NULL,
            review_gates INTEGER NOT NULL DEFAULT 0,
            findings_count INTEGER NOT NULL DEFAULT 0,
            report TEXT,
            error_message TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            UNIQUE (dd_id, run_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one pending, running or paused run per DD
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_dd_analysis_runs_one_active
        ON dd_analysis_runs (dd_id)
        WHERE status IN ('pending', 'running', 'awaiting_review')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_processing_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dd_processing_checkpoints (
            run_id TEXT PRIMARY KEY REFERENCES dd_analysis_runs(id) ON DELETE CASCADE,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            current_stage TEXT NOT NULL,
            completed_stages TEXT NOT NULL DEFAULT '[]',
            stage_progress TEXT NOT NULL DEFAULT '{}',
            approved_gates TEXT NOT NULL DEFAULT '[]',
            pass_results TEXT NOT NULL DEFAULT '{}',
            error_stage TEXT,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_findings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS perspective_risk_findings (
            id TEXT PRIMARY KEY,
            dd_id TEXT NOT NULL REFERENCES due_diligences(id) ON DELETE CASCADE,
            run_id TEXT NOT NULL REFERENCES dd_analysis_runs(id) ON DELETE CASCADE,
            perspective_risk_id TEXT REFERENCES perspective_risks(id) ON DELETE SET NULL,
            document_id TEXT REFERENCES documents(id) ON DELETE SET NULL,
            category TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL,
            finding_type TEXT NOT NULL,
            clause_reference TEXT,
            confidence REAL NOT NULL,
            verification_status TEXT NOT NULL DEFAULT 'unverified',
            status TEXT NOT NULL DEFAULT 'open',
            reviewer_note TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            duplicate_of TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_findings_run ON perspective_risk_findings(run_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_eval_rubrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dd_eval_rubrics (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            criteria TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_evaluations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dd_evaluations (
            id TEXT PRIMARY KEY,
            rubric_id TEXT NOT NULL REFERENCES dd_eval_rubrics(id) ON DELETE CASCADE,
            run_id TEXT NOT NULL REFERENCES dd_analysis_runs(id) ON DELETE CASCADE,
            scores TEXT NOT NULL,
            overall_score REAL NOT NULL,
            summary TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
