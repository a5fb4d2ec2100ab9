//! Per-item passes: PASS1_EXTRACT, PASS2_ANALYZE, PASS7_VERIFY

use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dd_common::PipelineStage;

use super::{PipelineOrchestrator, RunContext};
use crate::db;
use crate::models::{
    Blueprint, Document, DocumentExtraction, FindingDraft, PerspectiveRisk, ProcessingCheckpoint,
    Verification, VerificationStatus,
};
use crate::pipeline::prompts;
use crate::pipeline::{PipelineError, PipelineResult};
use crate::services::llm_client::LlmError;

fn llm_error(stage: PipelineStage) -> impl Fn(LlmError) -> PipelineError {
    move |source| PipelineError::Llm { stage, source }
}

impl PipelineOrchestrator {
    async fn documents_by_id(&self, ctx: &RunContext) -> PipelineResult<BTreeMap<Uuid, Document>> {
        Ok(db::documents::list_documents(&self.db, ctx.dd.id)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect())
    }

    /// Document and its text; `None` when it was removed since classification
    async fn document_text<'a>(
        &self,
        documents: &'a BTreeMap<Uuid, Document>,
        id: Uuid,
    ) -> PipelineResult<Option<(&'a Document, String)>> {
        let Some(document) = documents.get(&id) else {
            tracing::warn!(document_id = %id, "Document no longer exists, skipping");
            return Ok(None);
        };
        let text = self.store.read_text(document.dd_id, document.id).await?;
        Ok(text.map(|t| (document, t)))
    }

    // ------------------------------------------------------------------------
    // Pass 1
    // ------------------------------------------------------------------------

    pub(super) async fn stage_extract(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<()> {
        let documents = self.documents_by_id(ctx).await?;
        let items = checkpoint.pass_results.pending_items(PipelineStage::Pass1Extract);

        self.run_items(
            PipelineStage::Pass1Extract,
            checkpoint,
            items,
            cancel_token,
            |id| self.extract_document(ctx, &documents, id),
            |results, id, extraction| {
                results.pass1_extractions.insert(id, extraction);
            },
        )
        .await
    }

    async fn extract_document(
        &self,
        ctx: &RunContext,
        documents: &BTreeMap<Uuid, Document>,
        id: Uuid,
    ) -> PipelineResult<DocumentExtraction> {
        let Some((document, text)) = self.document_text(documents, id).await? else {
            return Ok(DocumentExtraction {
                document_id: id,
                file_name: documents.get(&id).map(|d| d.file_name.clone()).unwrap_or_default(),
                folder: None,
                summary: String::new(),
                parties: vec![],
                dates: vec![],
                amounts: vec![],
                key_terms: vec![],
            });
        };

        let request = prompts::extraction_request(
            &ctx.dd,
            &document.file_name,
            document.ai_category.as_deref(),
            &text,
            self.config.max_document_chars,
        );
        let response = self
            .llm()?
            .complete(request)
            .await
            .map_err(llm_error(PipelineStage::Pass1Extract))?;

        prompts::parse_extraction(
            &response.content,
            document.id,
            &document.file_name,
            document.ai_category.as_deref(),
        )
        .map_err(llm_error(PipelineStage::Pass1Extract))
    }

    // ------------------------------------------------------------------------
    // Pass 2
    // ------------------------------------------------------------------------

    pub(super) async fn stage_analyze(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<()> {
        let blueprint = self.blueprint(ctx)?;
        let documents = self.documents_by_id(ctx).await?;
        let risks = db::risks::list_perspective_risks(&self.db, ctx.dd.id).await?;
        let extractions = checkpoint.pass_results.pass1_extractions.clone();
        let items = checkpoint.pass_results.pending_items(PipelineStage::Pass2Analyze);

        self.run_items(
            PipelineStage::Pass2Analyze,
            checkpoint,
            items,
            cancel_token,
            |id| {
                self.analyze_document(ctx, &blueprint, &documents, &risks, extractions.get(&id), id)
            },
            |results, id, drafts| {
                results.pass2_findings.insert(id, drafts);
            },
        )
        .await
    }

    async fn analyze_document(
        &self,
        ctx: &RunContext,
        blueprint: &Blueprint,
        documents: &BTreeMap<Uuid, Document>,
        risks: &[PerspectiveRisk],
        extraction: Option<&DocumentExtraction>,
        id: Uuid,
    ) -> PipelineResult<Vec<FindingDraft>> {
        let Some((document, text)) = self.document_text(documents, id).await? else {
            return Ok(Vec::new());
        };

        let questions = blueprint.questions_for(document.ai_category.as_deref());
        let default_category = questions
            .first()
            .map(|q| q.category.clone())
            .unwrap_or_else(|| "general".to_string());

        let request = prompts::analysis_request(
            &ctx.dd,
            extraction,
            &document.file_name,
            &text,
            &questions,
            risks,
            self.config.max_document_chars,
        );
        let response = self
            .llm()?
            .complete(request)
            .await
            .map_err(llm_error(PipelineStage::Pass2Analyze))?;

        let drafts = prompts::parse_findings(&response.content, document.id, &default_category)
            .map_err(llm_error(PipelineStage::Pass2Analyze))?;

        tracing::debug!(
            run_id = %ctx.run.id,
            document = %document.file_name,
            findings = drafts.len(),
            "Document analysed"
        );
        Ok(drafts)
    }

    // ------------------------------------------------------------------------
    // Pass 7
    // ------------------------------------------------------------------------

    pub(super) async fn stage_verify(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<()> {
        let documents = self.documents_by_id(ctx).await?;
        let drafts: BTreeMap<Uuid, FindingDraft> = checkpoint
            .pass_results
            .all_drafts()
            .into_iter()
            .map(|d| (d.id, d.clone()))
            .collect();
        let items = checkpoint.pass_results.pending_items(PipelineStage::Pass7Verify);

        self.run_items(
            PipelineStage::Pass7Verify,
            checkpoint,
            items,
            cancel_token,
            |id| self.verify_finding(&documents, drafts.get(&id), id),
            |results, id, verification| {
                results.pass7_verifications.insert(id, verification);
            },
        )
        .await
    }

    async fn verify_finding(
        &self,
        documents: &BTreeMap<Uuid, Document>,
        draft: Option<&FindingDraft>,
        id: Uuid,
    ) -> PipelineResult<Verification> {
        let unverified = |note: &str, confidence: f64| Verification {
            status: VerificationStatus::Unverified,
            confidence,
            note: note.to_string(),
        };

        let Some(draft) = draft else {
            return Ok(unverified("Finding no longer present", 0.0));
        };
        let Some(document_id) = draft.document_id else {
            return Ok(unverified("No source document", draft.confidence));
        };
        let Some((document, text)) = self.document_text(documents, document_id).await? else {
            return Ok(unverified("Source text unavailable", draft.confidence));
        };

        let request =
            prompts::verification_request(draft, &document.file_name, &text, self.config.max_document_chars);
        let response = self
            .llm()?
            .complete(request)
            .await
            .map_err(llm_error(PipelineStage::Pass7Verify))?;

        let verification = prompts::parse_verification(&response.content)
            .map_err(llm_error(PipelineStage::Pass7Verify))?;
        tracing::debug!(finding_id = %id, status = %verification.status, "Finding verified");
        Ok(verification)
    }
}
