//! Polls the scheduler until submitted jobs reach a terminal state.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::parse::{parse_status, JobHandle, JobState};
use super::progress::ProgressIndicator;
use crate::cancellation::{RunGuard, TeardownReason};
use crate::config::MonitorSettings;
use crate::errors::{QpipelineError, Result};
use crate::process::ProcessRunner;

/// Source of scheduler status text for a job id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusQuery: Send + Sync {
    /// Returns the raw status text for `job_id`.
    async fn status(&self, job_id: &str) -> Result<String>;
}

/// Queries status by running `<program> <job id>`.
pub struct SchedulerStatusCommand {
    runner: Arc<dyn ProcessRunner>,
    program: String,
}

impl SchedulerStatusCommand {
    /// Creates a status query that runs `program` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

impl std::fmt::Debug for SchedulerStatusCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerStatusCommand")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StatusQuery for SchedulerStatusCommand {
    async fn status(&self, job_id: &str) -> Result<String> {
        let line = format!("{} {job_id}", self.program);
        match self.runner.run_line(&self.program, &line).await {
            Ok(result) => Ok(result.stdout),
            Err(QpipelineError::Submission { stderr, code, .. }) => {
                Err(QpipelineError::SchedulerQuery {
                    job_id: job_id.to_string(),
                    message: format!("{} exited with {code:?}: {stderr}", self.program),
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Final state of one tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// The job that was tracked.
    pub job: JobHandle,
    /// Its last observed state.
    pub state: JobState,
    /// Number of status queries made.
    pub polls: u32,
}

impl JobReport {
    fn new(job: JobHandle) -> Self {
        Self {
            job,
            state: JobState::Submitted,
            polls: 0,
        }
    }
}

/// Waits on scheduler jobs, racing every wait against operator interrupts.
pub struct QueueMonitor {
    query: Arc<dyn StatusQuery>,
    guard: Arc<RunGuard>,
    settings: MonitorSettings,
}

impl QueueMonitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(query: Arc<dyn StatusQuery>, guard: Arc<RunGuard>, settings: MonitorSettings) -> Self {
        Self {
            query,
            guard,
            settings,
        }
    }

    /// Returns the monitor settings.
    #[must_use]
    pub const fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Tracks every job to a terminal state.
    ///
    /// A job the scheduler reports as `Failed` is logged and returned with
    /// [`JobState::Failed`]; deciding what that means is left to the caller.
    /// An interrupt stops the progress indicator, tears the process group
    /// down and returns [`QpipelineError::Interrupted`].
    pub async fn wait(&self, jobs: &[JobHandle]) -> Result<Vec<JobReport>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = jobs.iter().map(JobHandle::id).collect();
        let mut progress = if self.settings.show_progress {
            ProgressIndicator::start(
                format!("Waiting for job {}", ids.join(", ")),
                self.settings.tick(),
            )
        } else {
            ProgressIndicator::disabled()
        };

        let result = self.track(jobs).await;
        progress.stop();

        if matches!(result, Err(QpipelineError::Interrupted)) {
            self.guard.terminate_group(TeardownReason::Interrupt);
        }
        result
    }

    async fn track(&self, jobs: &[JobHandle]) -> Result<Vec<JobReport>> {
        let mut reports: Vec<JobReport> = jobs.iter().cloned().map(JobReport::new).collect();

        self.pause(self.settings.initial_delay()).await?;

        loop {
            for report in reports.iter_mut().filter(|r| !r.state.is_terminal()) {
                let text = tokio::select! {
                    text = self.query.status(report.job.id()) => text?,
                    () = self.guard.interrupted() => return Err(QpipelineError::Interrupted),
                };
                report.polls += 1;
                report.state = report.state.advance(parse_status(&text));

                match report.state {
                    JobState::Finished => {
                        info!(job_id = %report.job.id(), stage = %report.job.stage(), "Job finished");
                    }
                    JobState::Failed => {
                        warn!(
                            job_id = %report.job.id(),
                            stage = %report.job.stage(),
                            status = %text,
                            "Scheduler reported job failure"
                        );
                    }
                    JobState::Submitted | JobState::Running => {
                        debug!(job_id = %report.job.id(), polls = report.polls, "Job still running");
                    }
                }
            }

            if reports.iter().all(|r| r.state.is_terminal()) {
                return Ok(reports);
            }
            self.pause(self.settings.poll_interval()).await?;
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.guard.interrupted() => Err(QpipelineError::Interrupted),
        }
    }
}

impl std::fmt::Debug for QueueMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMonitor")
            .field("guard", &self.guard)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessResult;
    use crate::testing::{RecordingProcessGroup, ScriptedRunner};
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_settings() -> MonitorSettings {
        MonitorSettings::default()
            .with_initial_delay_ms(0)
            .with_poll_interval_ms(1)
            .with_progress(false)
    }

    fn guard() -> (Arc<RecordingProcessGroup>, Arc<RunGuard>) {
        let group = Arc::new(RecordingProcessGroup::new());
        let guard = Arc::new(RunGuard::detached(group.clone()).with_quiet(true));
        (group, guard)
    }

    #[tokio::test]
    async fn test_polls_until_finished() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut query = MockStatusQuery::new();
        query
            .expect_status()
            .with(eq("123456"))
            .times(3)
            .returning(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(if n < 2 { "State: RUNNING".to_string() } else { "State: Finished".to_string() })
            });

        let (group, guard) = guard();
        let monitor = QueueMonitor::new(Arc::new(query), guard, fast_settings());
        let reports = monitor
            .wait(&[JobHandle::new("123456", "freesurfer")])
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, JobState::Finished);
        assert_eq!(reports[0].polls, 3);
        assert_eq!(group.terminate_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_returns_normally() {
        let mut query = MockStatusQuery::new();
        query
            .expect_status()
            .times(1)
            .returning(|_| Ok("State: Failed (exit 1)".to_string()));

        let (_group, guard) = guard();
        let monitor = QueueMonitor::new(Arc::new(query), guard, fast_settings());
        let reports = monitor.wait(&[JobHandle::new("9", "diffusion")]).await.unwrap();

        assert_eq!(reports[0].state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_tracks_every_job() {
        let mut query = MockStatusQuery::new();
        query
            .expect_status()
            .with(eq("1"))
            .times(1)
            .returning(|_| Ok("Finished".to_string()));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&second);
        query
            .expect_status()
            .with(eq("2"))
            .times(2)
            .returning(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(if n == 0 { "PENDING".to_string() } else { "Failed".to_string() })
            });

        let (_group, guard) = guard();
        let monitor = QueueMonitor::new(Arc::new(query), guard, fast_settings());
        let reports = monitor
            .wait(&[JobHandle::new("1", "a"), JobHandle::new("2", "b")])
            .await
            .unwrap();

        assert_eq!(reports[0].state, JobState::Finished);
        assert_eq!(reports[1].state, JobState::Failed);
        assert_eq!(reports[1].polls, 2);
    }

    #[tokio::test]
    async fn test_interrupt_during_grace_delay_tears_down_once() {
        let mut query = MockStatusQuery::new();
        query.expect_status().never();

        let (group, guard) = guard();
        let settings = fast_settings().with_initial_delay_ms(60_000);
        let monitor = QueueMonitor::new(Arc::new(query), Arc::clone(&guard), settings);

        let interrupter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                guard.interrupt();
            })
        };
        let err = monitor.wait(&[JobHandle::new("5", "freesurfer")]).await.unwrap_err();
        interrupter.await.unwrap();

        assert!(matches!(err, QpipelineError::Interrupted));
        assert_eq!(group.terminate_calls(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_while_polling() {
        let mut query = MockStatusQuery::new();
        query.expect_status().returning(|_| Ok("RUNNING".to_string()));

        let (group, guard) = guard();
        let settings = fast_settings().with_poll_interval_ms(5).with_progress(true).with_tick_ms(1);
        let monitor = QueueMonitor::new(Arc::new(query), Arc::clone(&guard), settings);

        let interrupter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                guard.interrupt();
            })
        };
        let err = monitor.wait(&[JobHandle::new("5", "freesurfer")]).await.unwrap_err();
        interrupter.await.unwrap();

        assert!(matches!(err, QpipelineError::Interrupted));
        assert_eq!(group.terminate_calls(), 1);
    }

    #[tokio::test]
    async fn test_status_command_runs_program_with_job_id() {
        let runner = Arc::new(
            ScriptedRunner::new().on("jobinfo 77", ProcessResult::success("JobState: Finished")),
        );
        let query = SchedulerStatusCommand::new(runner.clone(), "jobinfo");

        assert_eq!(query.status("77").await.unwrap(), "JobState: Finished");
        assert_eq!(runner.lines(), vec!["jobinfo 77".to_string()]);
    }

    #[tokio::test]
    async fn test_status_command_failure_maps_to_query_error() {
        let runner = Arc::new(ScriptedRunner::new().on("jobinfo", ProcessResult::failure(1, "unknown job")));
        let query = SchedulerStatusCommand::new(runner, "jobinfo");

        let err = query.status("77").await.unwrap_err();
        assert!(matches!(err, QpipelineError::SchedulerQuery { ref job_id, .. } if job_id == "77"));
    }

    #[tokio::test]
    async fn test_no_jobs_returns_immediately() {
        let (_group, guard) = guard();
        let monitor = QueueMonitor::new(Arc::new(MockStatusQuery::new()), guard, fast_settings());
        assert!(monitor.wait(&[]).await.unwrap().is_empty());
    }
}
