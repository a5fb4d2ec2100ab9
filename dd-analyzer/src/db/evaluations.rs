//! Rubric and evaluation queries

use dd_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{parse_timestamp, parse_uuid, EvalRubric, Evaluation};

fn row_to_rubric(row: &SqliteRow) -> Result<EvalRubric> {
    Ok(EvalRubric {
        id: parse_uuid(row.get("id"), "dd_eval_rubrics.id")?,
        name: row.get("name"),
        description: row.get("description"),
        criteria: serde_json::from_str(row.get("criteria"))
            .map_err(|e| Error::Internal(format!("Failed to deserialize criteria: {}", e)))?,
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
    })
}

/// Insert a rubric; names are unique
pub async fn insert_rubric(pool: &SqlitePool, rubric: &EvalRubric) -> Result<()> {
    let criteria = serde_json::to_string(&rubric.criteria)?;

    sqlx::query(
        "INSERT INTO dd_eval_rubrics (id, name, description, criteria, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(rubric.id.to_string())
    .bind(&rubric.name)
    .bind(&rubric.description)
    .bind(criteria)
    .bind(rubric.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::InvalidInput(format!("Rubric '{}' already exists", rubric.name))
        }
        other => Error::Database(other),
    })?;

    Ok(())
}

pub async fn list_rubrics(pool: &SqlitePool) -> Result<Vec<EvalRubric>> {
    let rows = sqlx::query("SELECT * FROM dd_eval_rubrics ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_rubric).collect()
}

pub async fn load_rubric(pool: &SqlitePool, id: Uuid) -> Result<Option<EvalRubric>> {
    let row = sqlx::query("SELECT * FROM dd_eval_rubrics WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_rubric).transpose()
}

pub async fn insert_evaluation(pool: &SqlitePool, evaluation: &Evaluation) -> Result<()> {
    let scores = serde_json::to_string(&evaluation.scores)?;

    sqlx::query(
        r#"
        INSERT INTO dd_evaluations (id, rubric_id, run_id, scores, overall_score, summary, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(evaluation.id.to_string())
    .bind(evaluation.rubric_id.to_string())
    .bind(evaluation.run_id.to_string())
    .bind(scores)
    .bind(evaluation.overall_score)
    .bind(&evaluation.summary)
    .bind(evaluation.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Evaluations of a run, newest first
pub async fn list_evaluations(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Evaluation>> {
    let rows = sqlx::query("SELECT * FROM dd_evaluations WHERE run_id = ? ORDER BY created_at DESC")
        .bind(run_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Evaluation {
                id: parse_uuid(row.get("id"), "dd_evaluations.id")?,
                rubric_id: parse_uuid(row.get("rubric_id"), "rubric_id")?,
                run_id: parse_uuid(row.get("run_id"), "run_id")?,
                scores: serde_json::from_str(row.get("scores"))
                    .map_err(|e| Error::Internal(format!("Failed to deserialize scores: {}", e)))?,
                overall_score: row.get("overall_score"),
                summary: row.get("summary"),
                created_at: parse_timestamp(row.get("created_at"), "created_at")?,
            })
        })
        .collect()
}
