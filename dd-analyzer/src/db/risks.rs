//! Perspective risk and finding queries

use chrono::Utc;
use dd_common::Result;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{
    parse_timestamp, parse_uuid, Finding, PerspectiveRisk, ReviewStatus, Severity,
};

// ============================================================================
// Perspective risks
// ============================================================================

fn row_to_risk(row: &SqliteRow) -> Result<PerspectiveRisk> {
    Ok(PerspectiveRisk {
        id: parse_uuid(row.get("id"), "perspective_risks.id")?,
        dd_id: parse_uuid(row.get("dd_id"), "perspective_risks.dd_id")?,
        title: row.get("title"),
        query: row.get("query"),
        category: row.get("category"),
        created_by: row.get("created_by"),
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
    })
}

pub async fn insert_perspective_risk(pool: &SqlitePool, risk: &PerspectiveRisk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO perspective_risks (id, dd_id, title, query, category, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(risk.id.to_string())
    .bind(risk.dd_id.to_string())
    .bind(&risk.title)
    .bind(&risk.query)
    .bind(&risk.category)
    .bind(&risk.created_by)
    .bind(risk.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_perspective_risks(pool: &SqlitePool, dd_id: Uuid) -> Result<Vec<PerspectiveRisk>> {
    let rows = sqlx::query("SELECT * FROM perspective_risks WHERE dd_id = ? ORDER BY created_at, rowid")
        .bind(dd_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_risk).collect()
}

/// Delete a risk of `dd_id`; findings keep existing with the link cleared
pub async fn delete_perspective_risk(pool: &SqlitePool, dd_id: Uuid, risk_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM perspective_risks WHERE id = ? AND dd_id = ?")
        .bind(risk_id.to_string())
        .bind(dd_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Findings
// ============================================================================

/// Optional filters of the findings listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingFilter {
    pub severity: Option<Severity>,
    pub status: Option<ReviewStatus>,
    pub category: Option<String>,
    /// Include findings marked as duplicates (default false)
    #[serde(default)]
    pub include_duplicates: bool,
}

fn row_to_finding(row: &SqliteRow) -> Result<Finding> {
    let optional_uuid = |column: &str| -> Result<Option<Uuid>> {
        row.get::<Option<&str>, _>(column)
            .map(|v| parse_uuid(v, column))
            .transpose()
    };

    Ok(Finding {
        id: parse_uuid(row.get("id"), "findings.id")?,
        dd_id: parse_uuid(row.get("dd_id"), "findings.dd_id")?,
        run_id: parse_uuid(row.get("run_id"), "findings.run_id")?,
        perspective_risk_id: optional_uuid("perspective_risk_id")?,
        document_id: optional_uuid("document_id")?,
        category: row.get("category"),
        title: row.get("title"),
        description: row.get("description"),
        severity: row.get::<&str, _>("severity").parse()?,
        finding_type: row.get::<&str, _>("finding_type").parse()?,
        clause_reference: row.get("clause_reference"),
        confidence: row.get("confidence"),
        verification_status: row.get::<&str, _>("verification_status").parse()?,
        status: row.get::<&str, _>("status").parse()?,
        reviewer_note: row.get("reviewer_note"),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row
            .get::<Option<&str>, _>("reviewed_at")
            .map(|v| parse_timestamp(v, "reviewed_at"))
            .transpose()?,
        duplicate_of: optional_uuid("duplicate_of")?,
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
    })
}

/// Replace every finding of a run in one transaction
///
/// Storing is repeatable: a resumed store stage overwrites what an earlier
/// attempt left behind.
pub async fn replace_run_findings(pool: &SqlitePool, run_id: Uuid, findings: &[Finding]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM perspective_risk_findings WHERE run_id = ?")
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await?;

    for finding in findings {
        sqlx::query(
            r#"
            INSERT INTO perspective_risk_findings (
                id, dd_id, run_id, perspective_risk_id, document_id, category, title,
                description, severity, finding_type, clause_reference, confidence,
                verification_status, status, reviewer_note, reviewed_by, reviewed_at,
                duplicate_of, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(finding.id.to_string())
        .bind(finding.dd_id.to_string())
        .bind(finding.run_id.to_string())
        .bind(finding.perspective_risk_id.map(|id| id.to_string()))
        .bind(finding.document_id.map(|id| id.to_string()))
        .bind(&finding.category)
        .bind(&finding.title)
        .bind(&finding.description)
        .bind(finding.severity.as_str())
        .bind(finding.finding_type.as_str())
        .bind(&finding.clause_reference)
        .bind(finding.confidence)
        .bind(finding.verification_status.as_str())
        .bind(finding.status.as_str())
        .bind(&finding.reviewer_note)
        .bind(&finding.reviewed_by)
        .bind(finding.reviewed_at.map(|dt| dt.to_rfc3339()))
        .bind(finding.duplicate_of.map(|id| id.to_string()))
        .bind(finding.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Findings of a run, most severe first
pub async fn list_findings(pool: &SqlitePool, run_id: Uuid, filter: &FindingFilter) -> Result<Vec<Finding>> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM perspective_risk_findings WHERE run_id = ");
    query.push_bind(run_id.to_string());

    if let Some(severity) = filter.severity {
        query.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = &filter.category {
        query.push(" AND category = ").push_bind(category.clone());
    }
    if !filter.include_duplicates {
        query.push(" AND duplicate_of IS NULL");
    }

    query.push(
        r#"
        ORDER BY CASE severity
            WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3
        END, created_at, rowid
        "#,
    );

    let rows = query.build().fetch_all(pool).await?;
    rows.iter().map(row_to_finding).collect()
}

pub async fn load_finding(pool: &SqlitePool, id: Uuid) -> Result<Option<Finding>> {
    let row = sqlx::query("SELECT * FROM perspective_risk_findings WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_finding).transpose()
}

/// Set reviewer fields; `None` leaves the field unchanged
pub async fn update_finding_review(
    pool: &SqlitePool,
    id: Uuid,
    status: Option<ReviewStatus>,
    note: Option<&str>,
    reviewed_by: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE perspective_risk_findings
        SET status = COALESCE(?, status),
            reviewer_note = COALESCE(?, reviewer_note),
            reviewed_by = COALESCE(?, reviewed_by),
            reviewed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(note)
    .bind(reviewed_by)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Post-store refinement of one finding
#[derive(Debug, Clone, PartialEq)]
pub struct FindingRefinement {
    pub finding_id: Uuid,
    pub duplicate_of: Option<Uuid>,
    pub perspective_risk_id: Option<Uuid>,
}

/// Apply duplicate marks and risk links in one transaction
pub async fn apply_refinements(pool: &SqlitePool, refinements: &[FindingRefinement]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for refinement in refinements {
        sqlx::query(
            "UPDATE perspective_risk_findings SET duplicate_of = ?, perspective_risk_id = ? WHERE id = ?",
        )
        .bind(refinement.duplicate_of.map(|id| id.to_string()))
        .bind(refinement.perspective_risk_id.map(|id| id.to_string()))
        .bind(refinement.finding_id.to_string())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
