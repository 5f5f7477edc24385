//! Builds the exact `qunex_container` invocation for a stage.
//!
//! Everything here is pure: the same context and stage always produce the
//! same command line, and nothing touches the filesystem or spawns processes.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::config::RunContext;
use crate::core::Stage;
use crate::errors::{QpipelineError, Result};

/// Program every stage is run through.
pub const CONTAINER_RUNNER: &str = "qunex_container";

/// Flag added to FreeSurfer when the T2 image is a FLAIR acquisition.
pub const FLAIR_FLAG: &str = "--hcp_fs_flair=TRUE";

/// Flag added to diffusion when GPU acceleration is disabled.
pub const NO_GPU_FLAG: &str = "--hcp_dwi_nogpu";

const CONTINUATION: &str = " \\\n      ";

/// A fully rendered external command for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCommand {
    stage: Stage,
    program: String,
    args: Vec<String>,
    scheduled: bool,
}

impl StageCommand {
    /// Creates a command from its parts.
    #[must_use]
    pub fn new(stage: Stage, program: impl Into<String>, args: Vec<String>, scheduled: bool) -> Self {
        Self {
            stage,
            program: program.into(),
            args,
            scheduled,
        }
    }

    /// The stage this command runs.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// The program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// True if the command carries scheduler directives and returns right
    /// after the submission is accepted.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Returns true if any argument equals `arg` or starts with `arg=`.
    #[must_use]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args
            .iter()
            .any(|a| a == arg || a.strip_prefix(arg).is_some_and(|rest| rest.starts_with('=')))
    }

    /// The shell command line, one argument per continued line.
    #[must_use]
    pub fn line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push_str(CONTINUATION);
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// Builds the command for `stage`.
///
/// Scheduler directives are added only when the context carries a queue and
/// the stage is schedulable. Stage flags are emitted only by the stages they
/// apply to.
pub fn build_command(ctx: &RunContext, stage: Stage) -> Result<StageCommand> {
    if ctx.study_folder().as_os_str().is_empty() {
        return Err(QpipelineError::config("Cannot build command: study folder is empty"));
    }
    if ctx.subject_id().trim().is_empty() {
        return Err(QpipelineError::config("Cannot build command: subject id is empty"));
    }
    if ctx.container().trim().is_empty() {
        return Err(QpipelineError::config("Cannot build command: container image is empty"));
    }

    let study = path_arg(ctx.study_folder());
    let run_root = path_arg(&ctx.run_root());
    let sessions = format!("{run_root}/sessions");
    let batch_file = format!("{run_root}/processing/batch.txt");
    let bind_study = format!("--bind={study}:{study}");
    let container = format!("--container={}", quote(ctx.container()));

    let mut args = vec![stage.qunex_command().to_string()];

    match stage {
        Stage::CreateStudy => {
            args.push(format!("--studyfolder={run_root}"));
            args.push(bind_study);
            args.push(container);
        }
        Stage::ImportBids => {
            let raw = raw_data_arg(ctx, stage)?;
            args.push(format!("--sessionsfolder={sessions}"));
            args.push(format!("--inbox={raw}"));
            args.push("--action=copy".to_string());
            args.push("--archive=leave".to_string());
            args.push("--overwrite=no".to_string());
            args.push(format!("--bind={study}:{study},{raw}:{raw}"));
            args.push(container);
        }
        Stage::CreateSessionInfo => {
            args.push(format!("--sessionsfolder={sessions}"));
            args.push(bind_study);
            args.push(format!("--mapping={run_root}/hcp_mapping_file.txt"));
            args.push(container);
        }
        Stage::CreateBatch => {
            args.push(bind_study);
            args.push(format!("--sessionsfolder={sessions}"));
            args.push(format!("--targetfile={batch_file}"));
            args.push(format!("--paramfile={run_root}/hcp_batch.txt"));
            args.push("--overwrite=yes".to_string());
            args.push(container);
        }
        Stage::SetupHcp => {
            let raw = raw_data_arg(ctx, stage)?;
            args.push(format!("--bind={study}:{study},{raw}:{raw}"));
            args.push(format!("--sessionsfolder={sessions}"));
            args.push(format!("--batchfile={batch_file}"));
            args.push(container);
        }
        Stage::PreFreesurfer | Stage::Freesurfer | Stage::PostFreesurfer | Stage::Diffusion => {
            args.push(bind_study);
            args.push(format!("--sessionsfolder={sessions}"));
            args.push(format!("--batchfile={batch_file}"));
            args.push(container);
            args.push("--overwrite=yes".to_string());
            args.extend(stage_flag_args(ctx, stage));
        }
    }

    let scheduled = match ctx.queue() {
        Some(queue) if stage.is_schedulable() => {
            args.extend(scheduler_args(ctx, stage, queue));
            true
        }
        _ => false,
    };

    Ok(StageCommand::new(stage, CONTAINER_RUNNER, args, scheduled))
}

fn stage_flag_args(ctx: &RunContext, stage: Stage) -> Vec<String> {
    let flags = ctx.flags();
    let mut out = Vec::new();
    if stage == Stage::Freesurfer && flags.flair {
        out.push(FLAIR_FLAG.to_string());
    }
    if stage == Stage::Diffusion && flags.no_gpu {
        out.push(NO_GPU_FLAG.to_string());
    }
    out
}

fn scheduler_args(ctx: &RunContext, stage: Stage, queue: &str) -> Vec<String> {
    let resources = ctx.scheduler();
    let job_name = format!("{}_{}", stage.name(), ctx.subject_id());
    let request_gpu = !(stage == Stage::Diffusion && ctx.flags().no_gpu);

    let mut out = Vec::new();
    if let Some(ref pre) = resources.bash_pre {
        out.push(format!("--bash_pre=\"{pre}\""));
    }
    out.push(format!(
        "--scheduler=\"{}\"",
        resources.directive(queue, &job_name, request_gpu)
    ));
    out
}

fn raw_data_arg(ctx: &RunContext, stage: Stage) -> Result<String> {
    ctx.raw_data().map(path_arg).ok_or_else(|| {
        QpipelineError::config(format!(
            "Cannot build command for {stage}: raw data folder is required"
        ))
    })
}

fn path_arg(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// Single-quotes a value if it contains characters the shell would split on.
fn quote(value: &str) -> String {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_./:=,@+-%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
