//! Pure text parsing of scheduler output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::errors::{QpipelineError, Result};

#[allow(clippy::expect_used)]
static JOB_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid job id pattern"));

/// A scheduler-assigned job id for one submitted stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: String,
    stage: String,
}

impl JobHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(id: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: stage.into(),
        }
    }

    /// The scheduler job id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The stage the job runs.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.stage)
    }
}

/// Extracts the job id from a submission's standard output.
///
/// The first `Submitted batch job <digits>` occurrence wins. No match is a
/// [`QpipelineError::Tracking`] error; an id is never guessed.
pub fn extract_job_id(stage: &str, stdout: &str) -> Result<JobHandle> {
    JOB_ID_PATTERN
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|id| JobHandle::new(id.as_str(), stage))
        .ok_or_else(|| QpipelineError::Tracking {
            stage: stage.to_string(),
            output: stdout.to_string(),
        })
}

/// Scheduler status as read from one status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Neither terminal marker was present.
    Pending,
    /// The text contained `Finished`.
    Finished,
    /// The text contained `Failed`.
    Failed,
}

impl JobStatus {
    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Interprets scheduler status text.
///
/// `Finished` is checked before `Failed`, so text containing both counts as
/// finished.
#[must_use]
pub fn parse_status(text: &str) -> JobStatus {
    if text.contains("Finished") {
        JobStatus::Finished
    } else if text.contains("Failed") {
        JobStatus::Failed
    } else {
        JobStatus::Pending
    }
}

/// Lifecycle of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the scheduler, not yet polled.
    Submitted,
    /// Polled at least once without a terminal status.
    Running,
    /// Scheduler reported success.
    Finished,
    /// Scheduler reported failure.
    Failed,
}

impl JobState {
    /// Applies one status observation.
    #[must_use]
    pub const fn advance(self, status: JobStatus) -> Self {
        match (self, status) {
            (Self::Finished | Self::Failed, _) => self,
            (_, JobStatus::Finished) => Self::Finished,
            (_, JobStatus::Failed) => Self::Failed,
            (_, JobStatus::Pending) => Self::Running,
        }
    }

    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_job_id() {
        let handle = extract_job_id(
            "freesurfer",
            "queued sub01\nSubmitted batch job 123456\nwaiting...\n",
        )
        .unwrap();
        assert_eq!(handle.id(), "123456");
        assert_eq!(handle.stage(), "freesurfer");
    }

    #[test]
    fn test_extract_job_id_first_match_wins() {
        let handle = extract_job_id("diffusion", "Submitted batch job 7\nSubmitted batch job 8").unwrap();
        assert_eq!(handle.id(), "7");
    }

    #[test]
    fn test_missing_job_id_is_fatal() {
        let err = extract_job_id("freesurfer", "sbatch: error: invalid partition").unwrap_err();
        match err {
            QpipelineError::Tracking { stage, output } => {
                assert_eq!(stage, "freesurfer");
                assert!(output.contains("invalid partition"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(extract_job_id("freesurfer", "Submitted batch job \n").is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("State: Finished (exit 0)"), JobStatus::Finished);
        assert_eq!(parse_status("State: Failed"), JobStatus::Failed);
        assert_eq!(parse_status("State: RUNNING"), JobStatus::Pending);
        assert_eq!(parse_status(""), JobStatus::Pending);
    }

    #[test]
    fn test_finished_takes_precedence() {
        assert_eq!(parse_status("step Failed, job Finished"), JobStatus::Finished);
    }

    #[test]
    fn test_job_state_transitions() {
        let state = JobState::Submitted.advance(JobStatus::Pending);
        assert_eq!(state, JobState::Running);
        assert_eq!(state.advance(JobStatus::Failed), JobState::Failed);
        assert_eq!(JobState::Submitted.advance(JobStatus::Finished), JobState::Finished);
        assert_eq!(JobState::Finished.advance(JobStatus::Failed), JobState::Finished);
        assert!(!JobState::Running.is_terminal());
    }
}
