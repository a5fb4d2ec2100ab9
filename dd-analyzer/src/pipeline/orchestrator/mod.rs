//! Pipeline orchestrator
//!
//! Runs the remaining stages of a run in registry order:
//!
//! WIZARD → CLASSIFICATION → [A] → PASS1 → [B] → PASS2 → PASS3 → PASS4 →
//! PASS5 → [C] → PASS6 → PASS7 → STORE → REFINE
//!
//! The checkpoint is saved after every stage and after every item of the
//! per-item passes. Stage bodies live in the `stage_*` modules.

mod stage_documents;
mod stage_setup;
mod stage_store;
mod stage_summary;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dd_common::config::PipelineConfig;
use dd_common::events::{DdEvent, EventBus};
use dd_common::PipelineStage;

use super::{PipelineError, PipelineResult, ResumePlan};
use crate::db;
use crate::models::{AnalysisRun, Blueprint, DueDiligence, PassResults, ProcessingCheckpoint, RunStatus};
use crate::services::{BlueprintRegistry, DocumentStore, LlmProvider};

/// How `execute` left the run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { findings: usize },
    AwaitingReview { gate: PipelineStage },
    Cancelled { stage: PipelineStage },
    Failed { stage: PipelineStage, error: String },
}

/// Loaded once per execution and shared by the stages
pub(crate) struct RunContext {
    pub dd: DueDiligence,
    pub run: AnalysisRun,
}

pub struct PipelineOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    llm: Option<Arc<dyn LlmProvider>>,
    blueprints: Arc<BlueprintRegistry>,
    store: DocumentStore,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        llm: Option<Arc<dyn LlmProvider>>,
        blueprints: Arc<BlueprintRegistry>,
        store: DocumentStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            llm,
            blueprints,
            store,
            config,
        }
    }

    fn llm(&self) -> PipelineResult<&dyn LlmProvider> {
        self.llm.as_deref().ok_or(PipelineError::LlmUnavailable)
    }

    fn blueprint(&self, ctx: &RunContext) -> PipelineResult<Arc<Blueprint>> {
        Ok(self.blueprints.get(&ctx.run.blueprint)?)
    }

    /// Execute (or resume) a run until it completes, pauses, fails or is cancelled
    ///
    /// Failures after the run was picked up are recorded on the run and
    /// reported as `RunOutcome::Failed`; `Err` means the run could not be
    /// started or its failure could not be recorded.
    pub async fn execute(&self, run_id: Uuid, cancel_token: CancellationToken) -> PipelineResult<RunOutcome> {
        let start_time = Instant::now();

        let run = db::runs::load_run(&self.db, run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;
        let mut checkpoint = db::checkpoints::load_checkpoint(&self.db, run_id)
            .await?
            .ok_or(PipelineError::CheckpointMissing(run_id))?;
        let dd = db::projects::load_dd(&self.db, run.dd_id)
            .await?
            .ok_or_else(|| dd_common::Error::NotFound(format!("DD {}", run.dd_id)))?;

        let plan = ResumePlan::derive(&checkpoint)?;
        let ctx = RunContext { dd, run };

        match self.drive(&ctx, &mut checkpoint, &plan, &cancel_token, start_time).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let stage = checkpoint.current_stage;
                self.finish_failed(&ctx, &mut checkpoint, stage, e).await
            }
        }
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        plan: &ResumePlan,
        cancel_token: &CancellationToken,
        start_time: Instant,
    ) -> PipelineResult<RunOutcome> {
        let run_id = ctx.run.id;

        plan.apply(checkpoint);
        db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;
        db::runs::update_run_status(&self.db, run_id, RunStatus::Running, None).await?;

        if plan.is_fresh() {
            tracing::info!(run_id = %run_id, dd_id = %ctx.dd.id, blueprint = %ctx.run.blueprint, "Starting analysis run");
            self.event_bus.emit_lossy(DdEvent::AnalysisStarted {
                dd_id: ctx.dd.id,
                run_id,
                timestamp: Utc::now(),
            });
        } else {
            tracing::info!(
                run_id = %run_id,
                from_stage = %plan.start,
                replayed_items = plan.replayed_items,
                "Resuming analysis run"
            );
            self.event_bus.emit_lossy(DdEvent::AnalysisResumed {
                dd_id: ctx.dd.id,
                run_id,
                from_stage: plan.start,
                timestamp: Utc::now(),
            });
        }

        for &stage in &plan.remaining {
            if cancel_token.is_cancelled() {
                return self.finish_cancelled(ctx, checkpoint, stage).await;
            }

            if stage.is_review_gate() {
                if ctx.run.review_gates {
                    // Approvals may have been recorded while earlier stages ran
                    let stored = db::checkpoints::load_approved_gates(&self.db, run_id).await?;
                    checkpoint.approved_gates.extend(stored);
                    if !checkpoint.is_gate_approved(stage) {
                        return self.pause_at_gate(ctx, checkpoint, stage).await;
                    }
                }
                checkpoint.complete_stage(stage);
                db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;
                continue;
            }

            let total = checkpoint.pass_results.item_total(stage);
            self.event_bus.emit_lossy(DdEvent::StageStarted {
                run_id,
                stage,
                total_items: total,
                timestamp: Utc::now(),
            });
            tracing::info!(run_id = %run_id, stage = %stage, total_items = total, "Stage started");

            if let Err(e) = self.run_stage(stage, ctx, checkpoint, cancel_token).await {
                return self.finish_failed(ctx, checkpoint, stage, e).await;
            }

            if cancel_token.is_cancelled() && stage.is_per_item() {
                return self.finish_cancelled(ctx, checkpoint, stage).await;
            }

            checkpoint.complete_stage(stage);
            db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;

            self.event_bus.emit_lossy(DdEvent::StageCompleted {
                run_id,
                stage,
                timestamp: Utc::now(),
            });
            tracing::info!(run_id = %run_id, stage = %stage, "Stage completed");
        }

        let findings = db::runs::load_run(&self.db, run_id)
            .await?
            .map(|r| r.findings_count.max(0) as usize)
            .unwrap_or_default();
        db::runs::update_run_status(&self.db, run_id, RunStatus::Completed, None).await?;

        let duration_seconds = start_time.elapsed().as_secs();
        tracing::info!(run_id = %run_id, findings, duration_seconds, "Analysis run completed");
        self.event_bus.emit_lossy(DdEvent::AnalysisCompleted {
            dd_id: ctx.dd.id,
            run_id,
            findings,
            duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(RunOutcome::Completed { findings })
    }

    async fn run_stage(
        &self,
        stage: PipelineStage,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<()> {
        match stage {
            PipelineStage::Wizard => self.stage_wizard(ctx, checkpoint).await,
            PipelineStage::Classification => self.stage_classification(ctx, checkpoint).await,
            PipelineStage::Pass1Extract => self.stage_extract(ctx, checkpoint, cancel_token).await,
            PipelineStage::Pass2Analyze => self.stage_analyze(ctx, checkpoint, cancel_token).await,
            PipelineStage::Pass3Calculate => self.stage_calculate(checkpoint),
            PipelineStage::Pass4CrossDoc => self.stage_cross_doc(ctx, checkpoint).await,
            PipelineStage::Pass5Aggregate => self.stage_aggregate(checkpoint),
            PipelineStage::Pass6Synthesize => self.stage_synthesize(ctx, checkpoint).await,
            PipelineStage::Pass7Verify => self.stage_verify(ctx, checkpoint, cancel_token).await,
            PipelineStage::Store => self.stage_store(ctx, checkpoint).await,
            PipelineStage::Refine => self.stage_refine(ctx, checkpoint).await,
            PipelineStage::CheckpointA | PipelineStage::CheckpointB | PipelineStage::CheckpointC => Ok(()),
        }
    }

    /// Run `work` for every item with bounded concurrency
    ///
    /// Each result is recorded and the checkpoint saved before the next one is
    /// taken. Stops early when cancelled; unfinished items stay pending.
    async fn run_items<T, W, Fut, R>(
        &self,
        stage: PipelineStage,
        checkpoint: &mut ProcessingCheckpoint,
        items: Vec<Uuid>,
        cancel_token: &CancellationToken,
        work: W,
        mut record: R,
    ) -> PipelineResult<()>
    where
        W: Fn(Uuid) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
        R: FnMut(&mut PassResults, Uuid, T),
    {
        let total = checkpoint.pass_results.item_total(stage);
        checkpoint.begin_stage(stage, total);
        if let Some(progress) = checkpoint.stage_progress.get_mut(&stage) {
            progress.completed = total.saturating_sub(items.len());
        }

        let concurrency = self.config.max_concurrent_documents.max(1);
        let mut results = stream::iter(items.into_iter().map(|id| {
            let fut = work(id);
            async move { (id, fut.await) }
        }))
        .buffer_unordered(concurrency);

        while let Some((id, result)) = results.next().await {
            let value = result?;
            record(&mut checkpoint.pass_results, id, value);
            checkpoint.record_item(stage);
            db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;

            let progress = checkpoint.stage_progress.get(&stage).copied().unwrap_or_default();
            self.event_bus.emit_lossy(DdEvent::StageProgress {
                run_id: checkpoint.run_id,
                stage,
                completed: progress.completed,
                total: progress.total,
                percent: checkpoint.progress_percent(),
                timestamp: Utc::now(),
            });

            if cancel_token.is_cancelled() {
                tracing::info!(run_id = %checkpoint.run_id, stage = %stage, "Cancellation requested, stopping item loop");
                break;
            }
        }

        Ok(())
    }

    async fn pause_at_gate(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        gate: PipelineStage,
    ) -> PipelineResult<RunOutcome> {
        checkpoint.current_stage = gate;
        db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;
        db::runs::update_run_status(&self.db, ctx.run.id, RunStatus::AwaitingReview, None).await?;

        tracing::info!(run_id = %ctx.run.id, gate = %gate, "Run awaiting review");
        self.event_bus.emit_lossy(DdEvent::AwaitingReview {
            run_id: ctx.run.id,
            gate,
            timestamp: Utc::now(),
        });

        Ok(RunOutcome::AwaitingReview { gate })
    }

    async fn finish_cancelled(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        stage: PipelineStage,
    ) -> PipelineResult<RunOutcome> {
        checkpoint.current_stage = stage;
        db::checkpoints::save_checkpoint(&self.db, checkpoint).await?;
        db::runs::update_run_status(&self.db, ctx.run.id, RunStatus::Cancelled, None).await?;

        tracing::info!(run_id = %ctx.run.id, stage = %stage, "Analysis run cancelled");
        self.event_bus.emit_lossy(DdEvent::AnalysisCancelled {
            dd_id: ctx.dd.id,
            run_id: ctx.run.id,
            stage,
            timestamp: Utc::now(),
        });

        Ok(RunOutcome::Cancelled { stage })
    }

    async fn finish_failed(
        &self,
        ctx: &RunContext,
        checkpoint: &mut ProcessingCheckpoint,
        stage: PipelineStage,
        error: PipelineError,
    ) -> PipelineResult<RunOutcome> {
        let message = error.to_string();
        tracing::error!(run_id = %ctx.run.id, stage = %stage, error = %message, "Stage failed");

        checkpoint.record_error(stage, message.clone());
        if let Err(e) = db::checkpoints::save_checkpoint(&self.db, checkpoint).await {
            tracing::warn!(run_id = %ctx.run.id, error = %e, "Failed to save checkpoint of failed run");
        }
        db::runs::update_run_status(&self.db, ctx.run.id, RunStatus::Failed, Some(&message)).await?;

        self.event_bus.emit_lossy(DdEvent::AnalysisFailed {
            dd_id: ctx.dd.id,
            run_id: ctx.run.id,
            stage,
            error: message.clone(),
            timestamp: Utc::now(),
        });

        Ok(RunOutcome::Failed { stage, error: message })
    }
}
