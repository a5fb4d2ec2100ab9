//! Schema creation tests

use dd_common::db::{create_schema, init_database};
use sqlx::{Row, SqlitePool};

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("dd.db")).await.unwrap();

    let tables = table_names(&pool).await;
    for expected in [
        "due_diligences",
        "folders",
        "documents",
        "document_versions",
        "perspective_risks",
        "perspective_risk_findings",
        "dd_analysis_runs",
        "dd_processing_checkpoints",
        "dd_eval_rubrics",
        "dd_evaluations",
        "settings",
        "schema_version",
    ] {
        assert!(tables.contains(&expected.to_string()), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dd.db");

    let pool = init_database(&db_path).await.unwrap();
    create_schema(&pool).await.unwrap();
    let before = table_names(&pool).await;
    pool.close().await;

    // Reopen existing database
    let pool = init_database(&db_path).await.unwrap();
    assert_eq!(table_names(&pool).await, before);
}

#[tokio::test]
async fn test_deleting_dd_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("dd.db")).await.unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO due_diligences (id, name, owner, transaction_type, created_at, updated_at)
         VALUES ('dd1', 'Project X', 'alice', 'm_and_a', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO folders (id, dd_id, name, path, created_at)
         VALUES ('f1', 'dd1', 'Contracts', 'Contracts', ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO documents (id, dd_id, folder_id, original_path, file_name, size_bytes,
                                sha256, storage_path, text_status, created_at, updated_at)
         VALUES ('d1', 'dd1', 'f1', 'Contracts/spa.txt', 'spa.txt', 3, 'abc', 'x', 'extracted', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO dd_analysis_runs (id, dd_id, run_number, status, blueprint, started_at)
         VALUES ('r1', 'dd1', 1, 'completed', 'm_and_a', ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO perspective_risk_findings (id, dd_id, run_id, document_id, category, title,
                                                description, severity, finding_type, confidence, created_at)
         VALUES ('x1', 'dd1', 'r1', 'd1', 'legal', 't', 'd', 'high', 'risk', 0.8, ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM due_diligences WHERE id = 'dd1'")
        .execute(&pool)
        .await
        .unwrap();

    for table in [
        "folders",
        "documents",
        "dd_analysis_runs",
        "perspective_risk_findings",
    ] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0, "{} not cascaded", table);
    }
}

#[tokio::test]
async fn test_deleting_folder_keeps_document() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("dd.db")).await.unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO due_diligences (id, name, owner, transaction_type, created_at, updated_at)
         VALUES ('dd1', 'Project X', 'alice', 'm_and_a', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO folders (id, dd_id, name, path, created_at) VALUES ('f1', 'dd1', 'A', 'A', ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO documents (id, dd_id, folder_id, original_path, file_name, size_bytes,
                                sha256, storage_path, text_status, created_at, updated_at)
         VALUES ('d1', 'dd1', 'f1', 'A/a.txt', 'a.txt', 1, 'h', 's', 'extracted', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM folders WHERE id = 'f1'")
        .execute(&pool)
        .await
        .unwrap();

    let folder_id: Option<String> =
        sqlx::query_scalar("SELECT folder_id FROM documents WHERE id = 'd1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(folder_id.is_none());
}

async fn seed_dd(pool: &SqlitePool) {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO due_diligences (id, name, owner, transaction_type, created_at, updated_at)
         VALUES ('dd1', 'Project X', 'alice', 'm_and_a', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_folder(pool: &SqlitePool, id: &str, is_standard: bool) -> dd_common::Result<()> {
    sqlx::query(
        "INSERT INTO folders (id, dd_id, name, path, is_standard, created_at)
         VALUES (?, 'dd1', 'Corporate', 'Corporate', ?, ?)",
    )
    .bind(id)
    .bind(is_standard as i64)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_standard_and_container_folders_share_a_path() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("dd.db")).await.unwrap();
    seed_dd(&pool).await;

    insert_folder(&pool, "container", false).await.unwrap();
    insert_folder(&pool, "standard", true).await.unwrap();

    let err = insert_folder(&pool, "container-again", false).await.unwrap_err();
    assert!(err.is_unique_violation());
}

async fn insert_run(pool: &SqlitePool, id: &str, run_number: i64, status: &str) -> dd_common::Result<()> {
    sqlx::query(
        "INSERT INTO dd_analysis_runs (id, dd_id, run_number, status, blueprint, started_at)
         VALUES (?, 'dd1', ?, ?, 'm_and_a', ?)",
    )
    .bind(id)
    .bind(run_number)
    .bind(status)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_one_active_run_per_dd() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("dd.db")).await.unwrap();
    seed_dd(&pool).await;

    insert_run(&pool, "r1", 1, "failed").await.unwrap();
    insert_run(&pool, "r2", 2, "awaiting_review").await.unwrap();

    let err = insert_run(&pool, "r3", 3, "pending").await.unwrap_err();
    assert!(err.is_unique_violation());

    insert_run(&pool, "r3", 3, "cancelled").await.unwrap();
    let err = sqlx::query("UPDATE dd_analysis_runs SET status = 'running' WHERE id = 'r1'")
        .execute(&pool)
        .await
        .map_err(dd_common::Error::from)
        .unwrap_err();
    assert!(err.is_unique_violation());
}
