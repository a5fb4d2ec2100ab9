//! Whole-run passes: PASS3_CALCULATE, PASS4_CROSS_DOC, PASS5_AGGREGATE, PASS6_SYNTHESIZE

use dd_common::PipelineStage;

use super::{PipelineOrchestrator, RunContext};
use crate::models::{DocumentExtraction, FindingDraft, ProcessingCheckpoint};
use crate::pipeline::{analytics, prompts};
use crate::pipeline::{PipelineError, PipelineResult};

impl PipelineOrchestrator {
    pub(super) fn stage_calculate(&self, checkpoint: &mut ProcessingCheckpoint) -> PipelineResult<()> {
        let results = &mut checkpoint.pass_results;
        let summary = analytics::financial_summary(results.pass1_extractions.values());

        tracing::debug!(
            run_id = %checkpoint.run_id,
            currencies = summary.totals_by_currency.len(),
            documents_with_amounts = summary.documents_with_amounts,
            "Financial summary computed"
        );
        results.pass3_financials = Some(summary);
        Ok(())
    }

    pub(super) async fn stage_cross_doc(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let extractions: Vec<&DocumentExtraction> = checkpoint
            .pass_results
            .pass1_extractions
            .values()
            .filter(|e| !e.summary.is_empty() || !e.amounts.is_empty())
            .collect();

        // Nothing to compare
        if extractions.len() < 2 {
            checkpoint.pass_results.pass4_conflicts = Some(Vec::new());
            return Ok(());
        }

        let response = self
            .llm()?
            .complete(prompts::conflicts_request(&ctx.dd, &extractions))
            .await
            .map_err(|source| PipelineError::Llm {
                stage: PipelineStage::Pass4CrossDoc,
                source,
            })?;
        let conflicts = prompts::parse_conflicts(&response.content, &extractions).map_err(|source| {
            PipelineError::Llm {
                stage: PipelineStage::Pass4CrossDoc,
                source,
            }
        })?;

        tracing::info!(run_id = %ctx.run.id, conflicts = conflicts.len(), "Cross-document check complete");
        checkpoint.pass_results.pass4_conflicts = Some(conflicts);
        Ok(())
    }

    pub(super) fn stage_aggregate(&self, checkpoint: &mut ProcessingCheckpoint) -> PipelineResult<()> {
        let aggregate = analytics::aggregate(&checkpoint.pass_results.all_drafts());

        tracing::info!(
            run_id = %checkpoint.run_id,
            total_findings = aggregate.total_findings,
            risk_score = aggregate.risk_score,
            "Findings aggregated"
        );
        checkpoint.pass_results.pass5_aggregate = Some(aggregate);
        Ok(())
    }

    pub(super) async fn stage_synthesize(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let results = &checkpoint.pass_results;
        let aggregate = results
            .pass5_aggregate
            .clone()
            .unwrap_or_else(|| analytics::aggregate(&results.all_drafts()));

        let drafts = results.all_drafts();
        let top: Vec<&FindingDraft> = aggregate
            .top_findings
            .iter()
            .filter_map(|id| drafts.iter().find(|d| d.id == *id).copied())
            .collect();
        let missing = results
            .classification
            .as_ref()
            .map(|c| c.missing_documents.as_slice())
            .unwrap_or(&[]);

        let request = prompts::synthesis_request(
            &ctx.dd,
            &aggregate,
            &top,
            results.pass3_financials.as_ref(),
            missing,
        );
        let response = self.llm()?.complete(request).await.map_err(|source| PipelineError::Llm {
            stage: PipelineStage::Pass6Synthesize,
            source,
        })?;
        let synthesis = prompts::parse_synthesis(&response.content).map_err(|source| PipelineError::Llm {
            stage: PipelineStage::Pass6Synthesize,
            source,
        })?;

        checkpoint.pass_results.pass6_synthesis = Some(synthesis);
        Ok(())
    }
}
