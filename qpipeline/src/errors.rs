//! Error types for qpipeline.
//!
//! Every failure the engine can produce is a variant of [`QpipelineError`].
//! The variants follow the run's failure taxonomy: configuration problems are
//! caught before any external command is issued, while submission, tracking,
//! scheduler and post-check failures happen mid-run and require the process
//! group to be torn down before exiting.

use thiserror::Error;

/// Exit status used for validated-input errors and stage failures.
pub const EXIT_FAILURE: u8 = 1;

/// Exit status used when the operator interrupts the run.
pub const EXIT_INTERRUPTED: u8 = 130;

/// The main error type for qpipeline operations.
#[derive(Debug, Error)]
pub enum QpipelineError {
    /// Missing parameter, missing environment value or malformed path.
    #[error("{0}")]
    Config(String),

    /// An external command exited non-zero.
    #[error("Error in calling command for {stage} (exit code {}): {stderr}", display_code(.code))]
    Submission {
        /// Stage (or helper command) that failed.
        stage: String,
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The submission output did not contain a scheduler job id.
    #[error("Unable to find job ID for {stage}. Job may still be running but pipeline will exit")]
    Tracking {
        /// Stage whose submission could not be tracked.
        stage: String,
        /// The submission output that was searched.
        output: String,
    },

    /// The scheduler status command could not be queried.
    #[error("Unable to query scheduler status for job {job_id}: {message}")]
    SchedulerQuery {
        /// Scheduler job id.
        job_id: String,
        /// Failure detail.
        message: String,
    },

    /// A stage ran but did not leave a completion marker behind.
    #[error("{stage} did not complete successfully: no completion marker found in {marker_dir}")]
    PostCheck {
        /// Stage name.
        stage: String,
        /// Directory that was searched.
        marker_dir: String,
    },

    /// The operator interrupted the run.
    #[error("Pipeline interrupted")]
    Interrupted,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl QpipelineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Returns true if the process group must be terminated before exiting.
    ///
    /// Configuration errors happen before any child is spawned, so there is
    /// nothing to tear down.
    #[must_use]
    pub const fn requires_teardown(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Serialization(_))
    }
}

impl From<serde_json::Error> for QpipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = QpipelineError> = std::result::Result<T, E>;
