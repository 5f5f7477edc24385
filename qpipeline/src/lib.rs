//! # qpipeline
//!
//! Stage orchestration and progress tracking for containerized
//! neuroimaging pipelines.
//!
//! qpipeline turns a study folder, a subject id and a handful of flags into
//! a fixed, linear list of `qunex_container` invocations and drives them to
//! completion:
//!
//! - **Command building**: deterministic command lines per stage, with
//!   scheduler directives when a cluster queue is given
//! - **Process execution**: shell execution with captured output and typed
//!   failures
//! - **Completion markers**: idempotent resume and post-run verification from
//!   the files the external toolchain writes
//! - **Queue monitoring**: job-id extraction and scheduler polling with a
//!   progress indicator
//! - **Cancellation**: one process group, torn down exactly once on interrupt
//!   or fatal error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qpipeline::prelude::*;
//!
//! let guard = Arc::new(RunGuard::acquire(Arc::new(OsProcessGroup))?);
//! let runner: Arc<dyn ProcessRunner> = Arc::new(ShellRunner::new("sh", guard.clone()));
//! let status = Arc::new(SchedulerStatusCommand::new(runner.clone(), "jobinfo"));
//! let monitor = QueueMonitor::new(status, guard.clone(), MonitorSettings::default());
//!
//! let ctx = RunContext::new("/data/study", "sub01", container_from_env("QUNEXCONIMAGE")?, None)?;
//! let summary = StageOrchestrator::new(ctx, runner, monitor, guard)
//!     .with_events(Arc::new(ConsoleEventSink::default()))
//!     .run(PipelineKind::Structural)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod commands;
pub mod completion;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod process;
pub mod scheduler;
pub mod setup;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{OsProcessGroup, ProcessGroup, RunGuard, TeardownReason};
    pub use crate::commands::{build_command, StageCommand};
    pub use crate::completion::{has_completed, CompletionChecker};
    pub use crate::config::{
        container_from_env, MonitorSettings, PipelineConfig, RunContext, SchedulerResources,
        StageFlags,
    };
    pub use crate::core::{MarkerStyle, Stage, StageStatus};
    pub use crate::errors::{QpipelineError, Result};
    pub use crate::events::{ConsoleEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        NoHooks, PipelineKind, RunSummary, StageHooks, StageOrchestrator, StageOutcome,
    };
    pub use crate::process::{ProcessResult, ProcessRunner, ShellRunner};
    pub use crate::scheduler::{
        extract_job_id, parse_status, JobHandle, JobReport, JobState, JobStatus, QueueMonitor,
        SchedulerStatusCommand, StatusQuery,
    };
    pub use crate::setup::{BatchSource, DataType, SetupHooks};
    pub use std::sync::Arc;
}
