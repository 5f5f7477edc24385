//! Drives a linear stage list to completion.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

use super::hooks::{NoHooks, StageHooks};
use super::plan::PipelineKind;
use super::summary::{RunSummary, StageOutcome};
use crate::cancellation::{RunGuard, TeardownReason};
use crate::commands::build_command;
use crate::completion::CompletionChecker;
use crate::config::RunContext;
use crate::core::{Stage, StageStatus};
use crate::errors::{QpipelineError, Result};
use crate::events::{
    EventSink, NoOpEventSink, PIPELINE_COMPLETED, STAGE_COMPLETED, STAGE_FAILED, STAGE_SKIPPED,
    STAGE_STARTED, STAGE_SUBMITTED,
};
use crate::process::{ProcessResult, ProcessRunner};
use crate::scheduler::{extract_job_id, JobState, QueueMonitor};

/// Runs stages strictly in order, verifying each before starting the next.
///
/// For every stage: skip it if its completion marker already exists,
/// otherwise build and run its command, wait on the scheduler if the command
/// was a submission, then require the marker. The first failure aborts the
/// run; stages already completed are left as they are, so re-running with
/// the same run root resumes at the first unfinished stage.
pub struct StageOrchestrator {
    ctx: RunContext,
    runner: Arc<dyn ProcessRunner>,
    monitor: QueueMonitor,
    checker: CompletionChecker,
    guard: Arc<RunGuard>,
    events: Arc<dyn EventSink>,
    hooks: Arc<dyn StageHooks>,
}

impl StageOrchestrator {
    /// Creates an orchestrator for one run context.
    #[must_use]
    pub fn new(
        ctx: RunContext,
        runner: Arc<dyn ProcessRunner>,
        monitor: QueueMonitor,
        guard: Arc<RunGuard>,
    ) -> Self {
        let checker = CompletionChecker::new(ctx.run_root());
        Self {
            ctx,
            runner,
            monitor,
            checker,
            guard,
            events: Arc::new(NoOpEventSink),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the stage hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn StageHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// The run context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs every stage of `pipeline`.
    pub async fn run(&self, pipeline: PipelineKind) -> Result<RunSummary> {
        self.run_stages(pipeline.name(), pipeline.stages()).await
    }

    /// Runs `stages` in order under the name `name`.
    ///
    /// On failure the process group is torn down (unless the error happened
    /// before anything could have been spawned) and the error is returned.
    pub async fn run_stages(&self, name: &str, stages: &[Stage]) -> Result<RunSummary> {
        let mut summary = RunSummary::new(name);
        let span = info_span!(
            "run",
            run_id = %summary.run_id,
            pipeline = %name,
            subject = %self.ctx.subject_id()
        );

        async move {
            info!(stages = stages.len(), "Starting pipeline");
            for &stage in stages {
                match self.run_stage(stage).await {
                    Ok(outcome) => summary.stages.push(outcome),
                    Err(err) => {
                        self.fail(stage, &err).await;
                        return Err(err);
                    }
                }
            }

            summary.finished_at = Some(Utc::now());
            info!(
                executed = summary.executed().len(),
                skipped = summary.skipped().len(),
                "Pipeline completed"
            );
            self.events
                .emit(PIPELINE_COMPLETED, Some(json!({ "pipeline": name, "run_id": summary.run_id })))
                .await;
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, stage: Stage) -> Result<StageOutcome> {
        if self.guard.is_interrupted() {
            return Err(QpipelineError::Interrupted);
        }

        if self.checker.has_completed(stage) {
            info!(stage = %stage, "Stage already completed, skipping");
            self.emit(STAGE_SKIPPED, stage, None).await;
            return Ok(StageOutcome::skipped(stage));
        }

        let started = Instant::now();
        self.hooks.before_stage(stage)?;
        let cmd = build_command(&self.ctx, stage)?;
        info!(stage = %stage, scheduled = cmd.is_scheduled(), "Running stage");
        debug!(stage = %stage, line = %cmd.line(), "Stage command");
        self.emit(STAGE_STARTED, stage, None).await;

        let mut job_id = None;
        let mut job_state = None;
        let output: Option<ProcessResult> = if cmd.is_scheduled() {
            let result = self.runner.run(&cmd).await?;
            let handle = extract_job_id(stage.name(), &result.stdout)?;
            info!(stage = %stage, job_id = %handle.id(), "Stage submitted");
            self.emit(STAGE_SUBMITTED, stage, Some(handle.id())).await;

            let reports = self.monitor.wait(std::slice::from_ref(&handle)).await?;
            job_state = reports.first().map(|r| r.state);
            job_id = Some(handle.id().to_string());
            Some(result)
        } else if self.hooks.needs_output(stage) {
            Some(self.runner.run(&cmd).await?)
        } else {
            self.runner.run_detached(&cmd).await?;
            None
        };

        // A Failed job is not fatal by itself; the marker check decides.
        if !self.checker.has_completed(stage) {
            return Err(QpipelineError::PostCheck {
                stage: stage.name().to_string(),
                marker_dir: self.checker.marker_dir().display().to_string(),
            });
        }
        if job_state == Some(JobState::Failed) {
            info!(stage = %stage, "Scheduler reported failure but completion marker is present");
        }

        self.hooks.after_stage(stage, output.as_ref())?;
        self.emit(STAGE_COMPLETED, stage, job_id.as_deref()).await;

        Ok(StageOutcome {
            stage,
            status: StageStatus::Done,
            job_id,
            job_state,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn fail(&self, stage: Stage, err: &QpipelineError) {
        if err.requires_teardown() {
            let reason = if matches!(err, QpipelineError::Interrupted) {
                TeardownReason::Interrupt
            } else {
                TeardownReason::Fatal
            };
            self.guard.terminate_group(reason);
        }
        error!(stage = %stage, error = %err, "Stage failed");
        self.events
            .emit(
                STAGE_FAILED,
                Some(json!({
                    "stage": stage.name(),
                    "title": stage.title(),
                    "error": err.to_string(),
                })),
            )
            .await;
    }

    async fn emit(&self, event_type: &str, stage: Stage, job_id: Option<&str>) {
        self.events
            .emit(
                event_type,
                Some(json!({
                    "stage": stage.name(),
                    "title": stage.title(),
                    "job_id": job_id,
                })),
            )
            .await;
    }
}

impl std::fmt::Debug for StageOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageOrchestrator")
            .field("ctx", &self.ctx)
            .field("monitor", &self.monitor)
            .field("checker", &self.checker)
            .finish_non_exhaustive()
    }
}
