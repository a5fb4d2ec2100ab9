//! WIZARD and CLASSIFICATION stages

use std::collections::BTreeMap;
use uuid::Uuid;

use super::{PipelineOrchestrator, RunContext};
use crate::db;
use crate::models::{
    Blueprint, ClassificationStatus, ClassificationSummary, Document, FindingDraft, FindingType,
    MissingDocument, ProcessingCheckpoint, Severity, WizardOutcome,
};
use crate::pipeline::{PipelineError, PipelineResult};
use crate::services::classifier::{compile_pattern, Classifier, Thresholds};

/// Category of missing-document findings
pub(crate) const MISSING_DOCUMENTS_CATEGORY: &str = "missing_documents";

impl PipelineOrchestrator {
    /// Resolve the blueprint and check there is something to analyse
    pub(super) async fn stage_wizard(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let blueprint = self.blueprint(ctx)?;

        let document_count = db::documents::count_documents(&self.db, ctx.dd.id).await?;
        if document_count == 0 {
            return Err(PipelineError::Invalid(format!(
                "DD {} has no documents to analyse",
                ctx.dd.id
            )));
        }
        let risks = db::risks::list_perspective_risks(&self.db, ctx.dd.id).await?;

        checkpoint.pass_results.wizard = Some(WizardOutcome {
            blueprint_key: blueprint.key.clone(),
            blueprint_name: blueprint.name.clone(),
            document_count: document_count as usize,
            expected_documents: blueprint.expected_documents.len(),
            perspective_risks: risks.len(),
        });

        tracing::debug!(
            run_id = %ctx.run.id,
            blueprint = %blueprint.key,
            documents = document_count,
            "Wizard complete"
        );
        Ok(())
    }

    /// Route every document to a standard folder and record the gaps
    pub(super) async fn stage_classification(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
    ) -> PipelineResult<()> {
        let blueprint = self.blueprint(ctx)?;
        let classifier = Classifier::new(&blueprint)
            .map_err(|e| PipelineError::Invalid(format!("Blueprint pattern error: {}", e)))?;
        let thresholds = Thresholds {
            auto_accept: db::settings::get_classifier_auto_accept(&self.db).await?,
            review_floor: db::settings::get_classifier_review_floor(&self.db).await?,
        };

        let mut folder_ids: BTreeMap<String, Uuid> = BTreeMap::new();
        for folder in &blueprint.folders {
            let created = db::documents::get_or_create_folder(
                &self.db,
                ctx.dd.id,
                None,
                &folder.name,
                &folder.name,
                true,
            )
            .await?;
            folder_ids.insert(folder.name.clone(), created.id);
        }

        let documents = db::documents::list_documents(&self.db, ctx.dd.id).await?;
        let mut summary = ClassificationSummary::default();
        let mut placed: Vec<(&Document, String, ClassificationStatus)> = Vec::with_capacity(documents.len());

        for document in &documents {
            // Reviewer decisions survive re-classification
            if document.classification_status == ClassificationStatus::Manual {
                if let Some(folder) = document.ai_category.clone() {
                    summary.classified += 1;
                    placed.push((document, folder, ClassificationStatus::Manual));
                    continue;
                }
            }

            let text = if document.has_text() {
                self.store.read_text(ctx.dd.id, document.id).await?
            } else {
                None
            };
            let decision = classifier.classify(&document.original_path, text.as_deref(), thresholds);

            db::documents::update_classification(
                &self.db,
                document.id,
                folder_ids.get(&decision.folder).copied(),
                Some(&decision.folder),
                Some(decision.confidence),
                decision.status,
            )
            .await?;

            match decision.status {
                ClassificationStatus::Classified | ClassificationStatus::Manual => summary.classified += 1,
                ClassificationStatus::NeedsReview => summary.needs_review += 1,
                ClassificationStatus::Unclassified | ClassificationStatus::Pending => summary.unclassified += 1,
            }
            placed.push((document, decision.folder, decision.status));
        }

        summary.in_scope = documents
            .iter()
            .filter(|d| d.has_text())
            .map(|d| d.id)
            .collect();
        summary.missing_documents = missing_documents(&blueprint, &placed)?;
        summary.gap_findings = summary
            .missing_documents
            .iter()
            .map(gap_finding)
            .collect();

        tracing::info!(
            run_id = %ctx.run.id,
            classified = summary.classified,
            needs_review = summary.needs_review,
            unclassified = summary.unclassified,
            in_scope = summary.in_scope.len(),
            missing = summary.missing_documents.len(),
            "Classification complete"
        );

        checkpoint.pass_results.classification = Some(summary);
        Ok(())
    }
}

/// Expected documents with no placed document in their folder
///
/// Unclassified documents never satisfy an expectation. An expectation with
/// patterns also needs a file-name match.
fn missing_documents(
    blueprint: &Blueprint,
    placed: &[(&Document, String, ClassificationStatus)],
) -> PipelineResult<Vec<MissingDocument>> {
    let mut missing = Vec::new();

    for expected in &blueprint.expected_documents {
        let patterns = expected
            .patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Invalid(format!("Blueprint pattern error: {}", e)))?;

        let found = placed.iter().any(|(document, folder, status)| {
            *status != ClassificationStatus::Unclassified
                && *folder == expected.folder
                && (patterns.is_empty() || patterns.iter().any(|re| re.is_match(&document.original_path)))
        });

        if !found {
            missing.push(MissingDocument {
                name: expected.name.clone(),
                folder: expected.folder.clone(),
                required: expected.required,
            });
        }
    }

    Ok(missing)
}

fn gap_finding(missing: &MissingDocument) -> FindingDraft {
    let (severity, description) = if missing.required {
        (
            Severity::High,
            format!(
                "Required document '{}' was not found in the {} folder of the data room.",
                missing.name, missing.folder
            ),
        )
    } else {
        (
            Severity::Low,
            format!(
                "Expected document '{}' was not found in the {} folder of the data room.",
                missing.name, missing.folder
            ),
        )
    };

    FindingDraft {
        id: Uuid::new_v4(),
        document_id: None,
        category: MISSING_DOCUMENTS_CATEGORY.to_string(),
        title: format!("Missing document: {}", missing.name),
        description,
        severity,
        finding_type: FindingType::MissingDocument,
        clause_reference: None,
        confidence: 1.0,
    }
}
