//! Per-stage extension points.

use crate::core::Stage;
use crate::errors::Result;
use crate::process::ProcessResult;

/// Work attached to stages that actually run.
///
/// Hooks are not invoked for stages skipped because they were already
/// complete. An error from a hook aborts the run like any stage failure.
pub trait StageHooks: Send + Sync {
    /// Called before the stage's command is built.
    fn before_stage(&self, _stage: Stage) -> Result<()> {
        Ok(())
    }

    /// Called once the stage's completion marker has been verified.
    ///
    /// `output` is present when the command's output was captured.
    fn after_stage(&self, _stage: Stage, _output: Option<&ProcessResult>) -> Result<()> {
        Ok(())
    }

    /// Returns true if [`StageHooks::after_stage`] needs the captured output.
    fn needs_output(&self, _stage: Stage) -> bool {
        false
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl StageHooks for NoHooks {}
