//! STORE and REFINE stages

use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{PipelineOrchestrator, RunContext};
use crate::db;
use crate::db::risks::FindingFilter;
use crate::models::{Finding, PassResults, ProcessingCheckpoint, ReviewStatus, VerificationStatus};
use crate::pipeline::{analytics, PipelineResult};
use crate::services::report;

/// Findings to persist: every draft with its verification applied
pub(crate) fn findings_from_results(dd_id: Uuid, run_id: Uuid, results: &PassResults) -> Vec<Finding> {
    let now = Utc::now();
    results
        .all_drafts()
        .into_iter()
        .map(|draft| {
            let verification = results.pass7_verifications.get(&draft.id);
            Finding {
                id: draft.id,
                dd_id,
                run_id,
                perspective_risk_id: None,
                document_id: draft.document_id,
                category: draft.category.clone(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                severity: draft.severity,
                finding_type: draft.finding_type,
                clause_reference: draft.clause_reference.clone(),
                confidence: verification.map(|v| v.confidence).unwrap_or(draft.confidence),
                verification_status: verification
                    .map(|v| v.status)
                    .unwrap_or(VerificationStatus::Unverified),
                status: ReviewStatus::Open,
                reviewer_note: None,
                reviewed_by: None,
                reviewed_at: None,
                duplicate_of: None,
                created_at: now,
            }
        })
        .collect()
}

impl PipelineOrchestrator {
    async fn write_report(
        &self,
        ctx: &RunContext,
        results: &PassResults,
        findings: &[Finding],
    ) -> PipelineResult<usize> {
        let names: BTreeMap<Uuid, String> = db::documents::list_documents(&self.db, ctx.dd.id)
            .await?
            .into_iter()
            .map(|d| (d.id, d.original_path))
            .collect();

        let report = report::build_report(&ctx.dd, &ctx.run, results, findings, &names);
        let count = report.findings_count();
        let value = serde_json::to_value(&report).map_err(dd_common::Error::from)?;
        db::runs::set_run_results(&self.db, ctx.run.id, count as i64, &value).await?;
        Ok(count)
    }

    /// Replace the run's findings and write the report
    pub(super) async fn stage_store(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let findings = findings_from_results(ctx.dd.id, ctx.run.id, &checkpoint.pass_results);
        db::risks::replace_run_findings(&self.db, ctx.run.id, &findings).await?;
        let count = self.write_report(ctx, &checkpoint.pass_results, &findings).await?;

        tracing::info!(run_id = %ctx.run.id, findings = count, "Findings stored");
        checkpoint.pass_results.stored = true;
        Ok(())
    }

    /// Mark near-duplicates, link perspective risks, then rewrite the report
    pub(super) async fn stage_refine(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let all = FindingFilter {
            include_duplicates: true,
            ..Default::default()
        };
        let findings = db::risks::list_findings(&self.db, ctx.run.id, &all).await?;
        let risks = db::risks::list_perspective_risks(&self.db, ctx.dd.id).await?;

        let refinements = analytics::refinements(&findings, &risks);
        db::risks::apply_refinements(&self.db, &refinements).await?;

        let refined = db::risks::list_findings(&self.db, ctx.run.id, &all).await?;
        let count = self.write_report(ctx, &checkpoint.pass_results, &refined).await?;

        tracing::info!(
            run_id = %ctx.run.id,
            refinements = refinements.len(),
            findings = count,
            "Findings refined"
        );
        checkpoint.pass_results.refined = true;
        Ok(())
    }
}
