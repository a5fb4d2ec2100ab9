//! Pipeline stage registry
//!
//! The analysis pipeline is a fixed, totally ordered sequence of named stages:
//!
//! WIZARD → CLASSIFICATION → CHECKPOINT_A → PASS1_EXTRACT → CHECKPOINT_B →
//! PASS2_ANALYZE → PASS3_CALCULATE → PASS4_CROSS_DOC → PASS5_AGGREGATE →
//! CHECKPOINT_C → PASS6_SYNTHESIZE → PASS7_VERIFY → STORE → REFINE
//!
//! Checkpoints A/B/C are review gates: a run may pause there until a reviewer
//! approves. Stage names are persisted as snake_case strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Project validation and blueprint resolution
    Wizard,
    /// Folder routing of every document
    Classification,
    /// Review gate: document set and classification
    CheckpointA,
    /// Pass 1: per-document fact extraction
    Pass1Extract,
    /// Review gate: extracted facts
    CheckpointB,
    /// Pass 2: per-document risk analysis
    Pass2Analyze,
    /// Pass 3: financial calculation
    Pass3Calculate,
    /// Pass 4: cross-document conflict detection
    Pass4CrossDoc,
    /// Pass 5: aggregation and scoring
    Pass5Aggregate,
    /// Review gate: aggregated findings before synthesis
    CheckpointC,
    /// Pass 6: executive synthesis
    Pass6Synthesize,
    /// Pass 7: verification of high-severity findings
    Pass7Verify,
    /// Persist findings and report
    Store,
    /// Post-store deduplication and risk linking
    Refine,
}

impl PipelineStage {
    /// Registry in execution order
    pub const ALL: [PipelineStage; 14] = [
        PipelineStage::Wizard,
        PipelineStage::Classification,
        PipelineStage::CheckpointA,
        PipelineStage::Pass1Extract,
        PipelineStage::CheckpointB,
        PipelineStage::Pass2Analyze,
        PipelineStage::Pass3Calculate,
        PipelineStage::Pass4CrossDoc,
        PipelineStage::Pass5Aggregate,
        PipelineStage::CheckpointC,
        PipelineStage::Pass6Synthesize,
        PipelineStage::Pass7Verify,
        PipelineStage::Store,
        PipelineStage::Refine,
    ];

    pub fn first() -> Self {
        Self::ALL[0]
    }

    pub fn last() -> Self {
        Self::ALL[Self::ALL.len() - 1]
    }

    /// Position in the registry
    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default()
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Stages from `self` (inclusive) to the end of the registry
    pub fn remaining(self) -> &'static [PipelineStage] {
        &Self::ALL[self.index()..]
    }

    pub fn is_review_gate(self) -> bool {
        matches!(
            self,
            PipelineStage::CheckpointA | PipelineStage::CheckpointB | PipelineStage::CheckpointC
        )
    }

    /// LLM pass number (1-7) for pass stages
    pub fn pass_number(self) -> Option<u8> {
        match self {
            PipelineStage::Pass1Extract => Some(1),
            PipelineStage::Pass2Analyze => Some(2),
            PipelineStage::Pass3Calculate => Some(3),
            PipelineStage::Pass4CrossDoc => Some(4),
            PipelineStage::Pass5Aggregate => Some(5),
            PipelineStage::Pass6Synthesize => Some(6),
            PipelineStage::Pass7Verify => Some(7),
            _ => None,
        }
    }

    /// Stages that record progress per document / per finding
    pub fn is_per_item(self) -> bool {
        matches!(
            self,
            PipelineStage::Pass1Extract | PipelineStage::Pass2Analyze | PipelineStage::Pass7Verify
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Wizard => "wizard",
            PipelineStage::Classification => "classification",
            PipelineStage::CheckpointA => "checkpoint_a",
            PipelineStage::Pass1Extract => "pass1_extract",
            PipelineStage::CheckpointB => "checkpoint_b",
            PipelineStage::Pass2Analyze => "pass2_analyze",
            PipelineStage::Pass3Calculate => "pass3_calculate",
            PipelineStage::Pass4CrossDoc => "pass4_cross_doc",
            PipelineStage::Pass5Aggregate => "pass5_aggregate",
            PipelineStage::CheckpointC => "checkpoint_c",
            PipelineStage::Pass6Synthesize => "pass6_synthesize",
            PipelineStage::Pass7Verify => "pass7_verify",
            PipelineStage::Store => "store",
            PipelineStage::Refine => "refine",
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Wizard => "Project setup",
            PipelineStage::Classification => "Document classification",
            PipelineStage::CheckpointA => "Checkpoint A: document review",
            PipelineStage::Pass1Extract => "Pass 1: extraction",
            PipelineStage::CheckpointB => "Checkpoint B: fact review",
            PipelineStage::Pass2Analyze => "Pass 2: risk analysis",
            PipelineStage::Pass3Calculate => "Pass 3: financial calculation",
            PipelineStage::Pass4CrossDoc => "Pass 4: cross-document conflicts",
            PipelineStage::Pass5Aggregate => "Pass 5: aggregation",
            PipelineStage::CheckpointC => "Checkpoint C: findings review",
            PipelineStage::Pass6Synthesize => "Pass 6: synthesis",
            PipelineStage::Pass7Verify => "Pass 7: verification",
            PipelineStage::Store => "Storing results",
            PipelineStage::Refine => "Refining results",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown pipeline stage: {}", s)))
    }
}
