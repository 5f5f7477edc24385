//! Run summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::{Stage, StageStatus};
use crate::scheduler::JobState;

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    /// The stage.
    pub stage: Stage,
    /// Final status.
    pub status: StageStatus,
    /// Scheduler job id, for submitted stages.
    pub job_id: Option<String>,
    /// Last scheduler state, for submitted stages.
    pub job_state: Option<JobState>,
    /// Time spent on the stage.
    pub duration_ms: u64,
}

impl StageOutcome {
    /// Outcome of a stage that was already complete.
    #[must_use]
    pub const fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            job_id: None,
            job_state: None,
            duration_ms: 0,
        }
    }
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last stage was verified.
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-stage outcomes in execution order.
    pub stages: Vec<StageOutcome>,
}

impl RunSummary {
    /// Starts a summary for `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Stages that were executed in this run.
    #[must_use]
    pub fn executed(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|o| o.status == StageStatus::Done)
            .map(|o| o.stage)
            .collect()
    }

    /// Stages skipped because they were already complete.
    #[must_use]
    pub fn skipped(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|o| o.status == StageStatus::Skipped)
            .map(|o| o.stage)
            .collect()
    }

    /// Returns true once every stage was verified or skipped.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_partitions_stages() {
        let mut summary = RunSummary::new("structural");
        summary.stages.push(StageOutcome::skipped(Stage::PreFreesurfer));
        summary.stages.push(StageOutcome {
            stage: Stage::Freesurfer,
            status: StageStatus::Done,
            job_id: Some("42".to_string()),
            job_state: Some(JobState::Finished),
            duration_ms: 10,
        });

        assert_eq!(summary.skipped(), vec![Stage::PreFreesurfer]);
        assert_eq!(summary.executed(), vec![Stage::Freesurfer]);
        assert!(!summary.is_success());
        summary.finished_at = Some(Utc::now());
        assert!(summary.is_success());
    }

    #[test]
    fn test_summary_serializes() {
        let summary = RunSummary::new("diffusion");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["pipeline"], "diffusion");
        assert!(json["run_id"].is_string());
    }
}
