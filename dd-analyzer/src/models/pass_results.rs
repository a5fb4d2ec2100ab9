//! Intermediate results of the analysis passes
//!
//! `PassResults` is serialized into the checkpoint row after every item and
//! every stage, so a resumed run replays what is already here instead of
//! calling the model again.

use super::risk::{FindingType, Severity, VerificationStatus};
use dd_common::PipelineStage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Output of the wizard stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WizardOutcome {
    pub blueprint_key: String,
    pub blueprint_name: String,
    pub document_count: usize,
    pub expected_documents: usize,
    pub perspective_risks: usize,
}

/// Blueprint expected document with no classified match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingDocument {
    pub name: String,
    pub folder: String,
    pub required: bool,
}

/// Output of the classification stage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassificationSummary {
    /// Documents with extracted text, in stable order
    pub in_scope: Vec<Uuid>,
    pub classified: usize,
    pub needs_review: usize,
    pub unclassified: usize,
    pub missing_documents: Vec<MissingDocument>,
    /// `missing_document` findings for the gaps above
    pub gap_findings: Vec<FindingDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyDate {
    pub label: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonetaryAmount {
    pub label: String,
    pub amount: f64,
    pub currency: String,
}

/// Pass 1 facts for one document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentExtraction {
    pub document_id: Uuid,
    pub file_name: String,
    pub folder: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub parties: Vec<String>,
    #[serde(default)]
    pub dates: Vec<KeyDate>,
    #[serde(default)]
    pub amounts: Vec<MonetaryAmount>,
    #[serde(default)]
    pub key_terms: Vec<String>,
}

/// Finding produced by a pass, before it is stored
///
/// The id is assigned when the draft is created and becomes the id of the
/// stored finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindingDraft {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub category: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub finding_type: FindingType,
    pub clause_reference: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmountRef {
    pub document_id: Uuid,
    pub file_name: String,
    pub label: String,
    pub amount: f64,
    pub currency: String,
}

/// Pass 3 output
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinancialSummary {
    pub totals_by_currency: BTreeMap<String, f64>,
    pub largest_amounts: Vec<AmountRef>,
    pub documents_with_amounts: usize,
}

/// Pass 5 output
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateSummary {
    pub total_findings: usize,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub category_counts: BTreeMap<String, usize>,
    /// Weighted severity score normalised to 0..100
    pub risk_score: f64,
    /// Ids of the most severe findings, most severe first
    pub top_findings: Vec<Uuid>,
}

/// Pass 6 output
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Synthesis {
    pub executive_summary: String,
    #[serde(default)]
    pub key_risks: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Pass 7 output for one finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    pub status: VerificationStatus,
    pub confidence: f64,
    #[serde(default)]
    pub note: String,
}

/// Accumulated results of every stage of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PassResults {
    #[serde(default)]
    pub wizard: Option<WizardOutcome>,
    #[serde(default)]
    pub classification: Option<ClassificationSummary>,
    #[serde(default)]
    pub pass1_extractions: BTreeMap<Uuid, DocumentExtraction>,
    #[serde(default)]
    pub pass2_findings: BTreeMap<Uuid, Vec<FindingDraft>>,
    #[serde(default)]
    pub pass3_financials: Option<FinancialSummary>,
    #[serde(default)]
    pub pass4_conflicts: Option<Vec<FindingDraft>>,
    #[serde(default)]
    pub pass5_aggregate: Option<AggregateSummary>,
    #[serde(default)]
    pub pass6_synthesis: Option<Synthesis>,
    #[serde(default)]
    pub pass7_verifications: BTreeMap<Uuid, Verification>,
    #[serde(default)]
    pub stored: bool,
    #[serde(default)]
    pub refined: bool,
}

impl PassResults {
    fn in_scope(&self) -> &[Uuid] {
        self.classification
            .as_ref()
            .map(|c| c.in_scope.as_slice())
            .unwrap_or(&[])
    }

    /// Every finding draft in a stable order: gaps, per-document, cross-document
    pub fn all_drafts(&self) -> Vec<&FindingDraft> {
        let gaps = self
            .classification
            .iter()
            .flat_map(|c| c.gap_findings.iter());
        let per_document = self.pass2_findings.values().flatten();
        let conflicts = self.pass4_conflicts.iter().flatten();
        gaps.chain(per_document).chain(conflicts).collect()
    }

    /// Findings pass 7 must verify: high/critical with a source document
    pub fn verification_targets(&self) -> Vec<Uuid> {
        self.all_drafts()
            .into_iter()
            .filter(|d| d.severity.needs_verification() && d.document_id.is_some())
            .map(|d| d.id)
            .collect()
    }

    /// Items of a per-item stage that have no result yet
    pub fn pending_items(&self, stage: PipelineStage) -> Vec<Uuid> {
        match stage {
            PipelineStage::Pass1Extract => self
                .in_scope()
                .iter()
                .filter(|id| !self.pass1_extractions.contains_key(id))
                .copied()
                .collect(),
            PipelineStage::Pass2Analyze => self
                .in_scope()
                .iter()
                .filter(|id| !self.pass2_findings.contains_key(id))
                .copied()
                .collect(),
            PipelineStage::Pass7Verify => self
                .verification_targets()
                .into_iter()
                .filter(|id| !self.pass7_verifications.contains_key(id))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Number of items a per-item stage processes in total
    pub fn item_total(&self, stage: PipelineStage) -> usize {
        match stage {
            PipelineStage::Pass1Extract | PipelineStage::Pass2Analyze => self.in_scope().len(),
            PipelineStage::Pass7Verify => self.verification_targets().len(),
            _ => 1,
        }
    }

    /// True when the outputs a completed `stage` must have left are present
    pub fn has_output(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Wizard => self.wizard.is_some(),
            PipelineStage::Classification => self.classification.is_some(),
            PipelineStage::CheckpointA | PipelineStage::CheckpointB | PipelineStage::CheckpointC => {
                true
            }
            PipelineStage::Pass1Extract
            | PipelineStage::Pass2Analyze
            | PipelineStage::Pass7Verify => {
                self.classification.is_some() && self.pending_items(stage).is_empty()
            }
            PipelineStage::Pass3Calculate => self.pass3_financials.is_some(),
            PipelineStage::Pass4CrossDoc => self.pass4_conflicts.is_some(),
            PipelineStage::Pass5Aggregate => self.pass5_aggregate.is_some(),
            PipelineStage::Pass6Synthesize => self.pass6_synthesis.is_some(),
            PipelineStage::Store => self.stored,
            PipelineStage::Refine => self.refined,
        }
    }

    /// Drop the output of `stage` so it is recomputed
    pub fn clear(&mut self, stage: PipelineStage) {
        match stage {
            PipelineStage::Wizard => self.wizard = None,
            PipelineStage::Classification => self.classification = None,
            PipelineStage::Pass1Extract => self.pass1_extractions.clear(),
            PipelineStage::Pass2Analyze => self.pass2_findings.clear(),
            PipelineStage::Pass3Calculate => self.pass3_financials = None,
            PipelineStage::Pass4CrossDoc => self.pass4_conflicts = None,
            PipelineStage::Pass5Aggregate => self.pass5_aggregate = None,
            PipelineStage::Pass6Synthesize => self.pass6_synthesis = None,
            PipelineStage::Pass7Verify => self.pass7_verifications.clear(),
            PipelineStage::Store => self.stored = false,
            PipelineStage::Refine => self.refined = false,
            PipelineStage::CheckpointA | PipelineStage::CheckpointB | PipelineStage::CheckpointC => {}
        }
    }

    /// Distinct categories across all drafts
    pub fn categories(&self) -> BTreeSet<String> {
        self.all_drafts()
            .into_iter()
            .map(|d| d.category.clone())
            .collect()
    }
}
