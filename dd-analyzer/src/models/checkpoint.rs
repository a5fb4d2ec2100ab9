//! Per-run processing checkpoint

use super::pass_results::PassResults;
use chrono::{DateTime, Utc};
use dd_common::PipelineStage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Item counters of one stage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageProgress {
    pub completed: usize,
    pub total: usize,
}

/// Persisted pipeline progress of one run
///
/// `completed_stages` is kept in registry order and is always a prefix of
/// `PipelineStage::ALL` once a resume plan has been applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingCheckpoint {
    pub run_id: Uuid,
    pub dd_id: Uuid,
    pub current_stage: PipelineStage,
    pub completed_stages: Vec<PipelineStage>,
    pub stage_progress: BTreeMap<PipelineStage, StageProgress>,
    pub approved_gates: BTreeSet<PipelineStage>,
    pub pass_results: PassResults,
    pub error_stage: Option<PipelineStage>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingCheckpoint {
    pub fn new(run_id: Uuid, dd_id: Uuid) -> Self {
        Self {
            run_id,
            dd_id,
            current_stage: PipelineStage::first(),
            completed_stages: Vec::new(),
            stage_progress: BTreeMap::new(),
            approved_gates: BTreeSet::new(),
            pass_results: PassResults::default(),
            error_stage: None,
            error_message: None,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self, stage: PipelineStage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// Enter `stage`, keeping counters already recorded for it
    pub fn begin_stage(&mut self, stage: PipelineStage, total: usize) {
        self.current_stage = stage;
        let progress = self.stage_progress.entry(stage).or_default();
        progress.total = total;
        progress.completed = progress.completed.min(total);
        self.updated_at = Utc::now();
    }

    /// Count one finished item of a per-item stage
    pub fn record_item(&mut self, stage: PipelineStage) {
        let progress = self.stage_progress.entry(stage).or_default();
        progress.completed = (progress.completed + 1).min(progress.total);
        self.updated_at = Utc::now();
    }

    /// Mark `stage` done and advance to the next stage
    pub fn complete_stage(&mut self, stage: PipelineStage) {
        if !self.is_completed(stage) {
            self.completed_stages.push(stage);
            self.completed_stages.sort();
        }
        if let Some(progress) = self.stage_progress.get_mut(&stage) {
            progress.completed = progress.total;
        }
        self.current_stage = stage.next().unwrap_or(stage);
        self.error_stage = None;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn record_error(&mut self, stage: PipelineStage, message: impl Into<String>) {
        self.error_stage = Some(stage);
        self.error_message = Some(message.into());
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn is_gate_approved(&self, gate: PipelineStage) -> bool {
        self.approved_gates.contains(&gate)
    }

    pub fn is_finished(&self) -> bool {
        PipelineStage::ALL.iter().all(|s| self.is_completed(*s))
    }

    /// Overall progress (0.0 - 100.0)
    ///
    /// Completed stages count fully; an unfinished per-item stage contributes
    /// its item fraction.
    pub fn progress_percent(&self) -> f64 {
        let stage_count = PipelineStage::ALL.len() as f64;
        let mut done = self.completed_stages.len() as f64;

        if !self.is_completed(self.current_stage) && self.current_stage.is_per_item() {
            if let Some(progress) = self.stage_progress.get(&self.current_stage) {
                if progress.total > 0 {
                    done += progress.completed as f64 / progress.total as f64;
                }
            }
        }

        (done / stage_count * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checkpoint_starts_at_wizard() {
        let cp = ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(cp.current_stage, PipelineStage::Wizard);
        assert!(cp.completed_stages.is_empty());
        assert_eq!(cp.progress_percent(), 0.0);
    }

    #[test]
    fn test_complete_stage_appends_once_and_advances() {
        let mut cp = ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4());
        cp.complete_stage(PipelineStage::Wizard);
        cp.complete_stage(PipelineStage::Wizard);
        assert_eq!(cp.completed_stages, vec![PipelineStage::Wizard]);
        assert_eq!(cp.current_stage, PipelineStage::Classification);
    }

    #[test]
    fn test_complete_last_stage_stays_on_last() {
        let mut cp = ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4());
        for stage in PipelineStage::ALL {
            cp.complete_stage(stage);
        }
        assert_eq!(cp.current_stage, PipelineStage::Refine);
        assert!(cp.is_finished());
        assert_eq!(cp.progress_percent(), 100.0);
    }

    #[test]
    fn test_progress_includes_partial_per_item_stage() {
        let mut cp = ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4());
        for stage in [
            PipelineStage::Wizard,
            PipelineStage::Classification,
            PipelineStage::CheckpointA,
        ] {
            cp.complete_stage(stage);
        }
        cp.begin_stage(PipelineStage::Pass1Extract, 4);
        cp.record_item(PipelineStage::Pass1Extract);
        cp.record_item(PipelineStage::Pass1Extract);

        let expected = 3.5 / 14.0 * 100.0;
        assert!((cp.progress_percent() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_record_error_counts_retries() {
        let mut cp = ProcessingCheckpoint::new(Uuid::new_v4(), Uuid::new_v4());
        cp.record_error(PipelineStage::Pass2Analyze, "boom");
        cp.record_error(PipelineStage::Pass2Analyze, "boom again");
        assert_eq!(cp.retry_count, 2);
        assert_eq!(cp.error_message.as_deref(), Some("boom again"));

        cp.complete_stage(PipelineStage::Pass2Analyze);
        assert!(cp.error_stage.is_none());
    }
}
