//! Resume planning
//!
//! Turns a stored checkpoint into the list of stages still to run. The
//! completed list is only trusted as a registry prefix, and only as far as
//! the pass results it claims are actually present.

use dd_common::PipelineStage;
use tracing::{info, warn};

use super::{PipelineError, PipelineResult};
use crate::models::ProcessingCheckpoint;

#[derive(Debug, Clone, PartialEq)]
pub struct ResumePlan {
    /// First stage to execute
    pub start: PipelineStage,
    /// `start` and every later stage, in order
    pub remaining: Vec<PipelineStage>,
    /// Completed stages ordered after the first gap, discarded as stale
    pub dropped: Vec<PipelineStage>,
    /// Set when missing results moved `start` back from this stage
    pub rewound_from: Option<PipelineStage>,
    /// Items of a per-item `start` stage whose results are replayed
    pub replayed_items: usize,
}

impl ResumePlan {
    pub fn derive(checkpoint: &ProcessingCheckpoint) -> PipelineResult<Self> {
        let Some(first_gap) = PipelineStage::ALL
            .iter()
            .copied()
            .find(|stage| !checkpoint.is_completed(*stage))
        else {
            return Err(PipelineError::AlreadyComplete(checkpoint.run_id));
        };

        let dropped: Vec<PipelineStage> = checkpoint
            .completed_stages
            .iter()
            .copied()
            .filter(|stage| *stage > first_gap)
            .collect();
        if !dropped.is_empty() {
            warn!(
                run_id = %checkpoint.run_id,
                ?dropped,
                first_gap = %first_gap,
                "Dropping completed stages recorded after an unfinished stage"
            );
        }

        let results = &checkpoint.pass_results;
        let missing = PipelineStage::ALL
            .iter()
            .copied()
            .take_while(|stage| *stage < first_gap)
            .find(|stage| !results.has_output(*stage));

        let (start, rewound_from) = match missing {
            Some(stage) => {
                warn!(
                    run_id = %checkpoint.run_id,
                    stage = %stage,
                    "Completed stage has no stored results, rewinding"
                );
                (stage, Some(first_gap))
            }
            None => (first_gap, None),
        };

        let replayed_items = if start.is_per_item() && results.classification.is_some() {
            results
                .item_total(start)
                .saturating_sub(results.pending_items(start).len())
        } else {
            0
        };

        Ok(Self {
            start,
            remaining: start.remaining().to_vec(),
            dropped,
            rewound_from,
            replayed_items,
        })
    }

    /// True when nothing has run yet
    pub fn is_fresh(&self) -> bool {
        self.start == PipelineStage::first() && self.replayed_items == 0
    }

    /// Bring the checkpoint in line with the plan
    ///
    /// Completed stages from `start` on are forgotten and their results
    /// cleared. A per-item `start` stage keeps its finished items.
    pub fn apply(&self, checkpoint: &mut ProcessingCheckpoint) {
        checkpoint.completed_stages.retain(|stage| *stage < self.start);
        checkpoint.current_stage = self.start;
        checkpoint
            .stage_progress
            .retain(|stage, _| *stage <= self.start);

        for stage in &self.remaining {
            let keep_items = *stage == self.start && stage.is_per_item();
            if !keep_items {
                checkpoint.pass_results.clear(*stage);
                checkpoint.stage_progress.remove(stage);
            }
        }

        if self.rewound_from.is_some() || !self.dropped.is_empty() {
            info!(
                run_id = %checkpoint.run_id,
                start = %self.start,
                "Checkpoint truncated for resume"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClassificationSummary, DocumentExtraction, PassResults, WizardOutcome,
    };
    use uuid::Uuid;

    fn checkpoint() -> ProcessingCheckpoint {
        ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn wizard() -> WizardOutcome {
        WizardOutcome {
            blueprint_key: "m_and_a".into(),
            blueprint_name: "M&A".into(),
            document_count: 2,
            expected_documents: 0,
            perspective_risks: 0,
        }
    }

    fn extraction(id: Uuid) -> DocumentExtraction {
        DocumentExtraction {
            document_id: id,
            file_name: "doc.txt".into(),
            folder: None,
            summary: "summary".into(),
            parties: vec![],
            dates: vec![],
            amounts: vec![],
            key_terms: vec![],
        }
    }

    fn through_classification(docs: &[Uuid]) -> ProcessingCheckpoint {
        let mut cp = checkpoint();
        cp.pass_results = PassResults {
            wizard: Some(wizard()),
            classification: Some(ClassificationSummary {
                in_scope: docs.to_vec(),
                ..Default::default()
            }),
            ..Default::default()
        };
        cp.complete_stage(PipelineStage::Wizard);
        cp.complete_stage(PipelineStage::Classification);
        cp.complete_stage(PipelineStage::CheckpointA);
        cp
    }

    #[test]
    fn test_fresh_checkpoint_starts_at_wizard() {
        let plan = ResumePlan::derive(&checkpoint()).unwrap();
        assert_eq!(plan.start, PipelineStage::Wizard);
        assert_eq!(plan.remaining.len(), PipelineStage::ALL.len());
        assert!(plan.is_fresh());
    }

    #[test]
    fn test_all_completed_is_error() {
        let mut cp = checkpoint();
        cp.completed_stages = PipelineStage::ALL.to_vec();
        assert!(matches!(
            ResumePlan::derive(&cp),
            Err(PipelineError::AlreadyComplete(_))
        ));
    }

    #[test]
    fn test_starts_after_completed_prefix() {
        let cp = through_classification(&[Uuid::new_v4()]);
        let plan = ResumePlan::derive(&cp).unwrap();
        assert_eq!(plan.start, PipelineStage::Pass1Extract);
        assert_eq!(plan.remaining[0], PipelineStage::Pass1Extract);
        assert_eq!(plan.remaining.last(), Some(&PipelineStage::Refine));
        assert!(plan.rewound_from.is_none());
    }

    #[test]
    fn test_non_prefix_completion_is_dropped() {
        let mut cp = through_classification(&[]);
        cp.completed_stages.push(PipelineStage::Pass3Calculate);
        cp.completed_stages.push(PipelineStage::Store);

        let plan = ResumePlan::derive(&cp).unwrap();
        assert_eq!(plan.start, PipelineStage::Pass1Extract);
        assert_eq!(
            plan.dropped,
            vec![PipelineStage::Pass3Calculate, PipelineStage::Store]
        );

        plan.apply(&mut cp);
        assert_eq!(
            cp.completed_stages,
            vec![
                PipelineStage::Wizard,
                PipelineStage::Classification,
                PipelineStage::CheckpointA
            ]
        );
    }

    #[test]
    fn test_missing_results_rewind_start() {
        let mut cp = through_classification(&[Uuid::new_v4()]);
        cp.pass_results.classification = None;

        let plan = ResumePlan::derive(&cp).unwrap();
        assert_eq!(plan.start, PipelineStage::Classification);
        assert_eq!(plan.rewound_from, Some(PipelineStage::Pass1Extract));

        plan.apply(&mut cp);
        assert_eq!(cp.completed_stages, vec![PipelineStage::Wizard]);
        assert_eq!(cp.current_stage, PipelineStage::Classification);
    }

    #[test]
    fn test_partial_per_item_stage_replays_done_items() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut cp = through_classification(&[a, b, c]);
        cp.pass_results.pass1_extractions.insert(a, extraction(a));
        cp.pass_results.pass1_extractions.insert(b, extraction(b));

        let plan = ResumePlan::derive(&cp).unwrap();
        assert_eq!(plan.start, PipelineStage::Pass1Extract);
        assert_eq!(plan.replayed_items, 2);

        plan.apply(&mut cp);
        assert_eq!(cp.pass_results.pass1_extractions.len(), 2);
        assert_eq!(cp.pass_results.pending_items(PipelineStage::Pass1Extract), vec![c]);
    }

    #[test]
    fn test_apply_clears_results_after_start() {
        let a = Uuid::new_v4();
        let mut cp = through_classification(&[a]);
        cp.pass_results.pass3_financials = Some(Default::default());
        cp.pass_results.stored = true;

        let plan = ResumePlan::derive(&cp).unwrap();
        plan.apply(&mut cp);
        assert!(cp.pass_results.pass3_financials.is_none());
        assert!(!cp.pass_results.stored);
        assert!(cp.pass_results.classification.is_some());
    }
}
