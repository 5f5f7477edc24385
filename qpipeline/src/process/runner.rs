//! Runs external command lines through a shell.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error};

use crate::cancellation::{RunGuard, TeardownReason};
use crate::commands::StageCommand;
use crate::errors::{QpipelineError, Result};

/// Outcome of one external invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output, trimmed.
    pub stdout: String,
    /// Captured standard error, trimmed.
    pub stderr: String,
    /// Wall-clock time the command took.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ProcessResult {
    /// Creates a successful result with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Creates a failed result with the given exit code and stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Returns true if the process exited with status 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes command lines to completion.
///
/// Implementations return `Ok` only for a zero exit status. A non-zero exit
/// is a [`QpipelineError::Submission`] carrying the captured stderr.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs a raw command line. `label` names the caller in errors and logs.
    async fn run_line(&self, label: &str, line: &str) -> Result<ProcessResult>;

    /// Runs a stage command and returns its captured output.
    async fn run(&self, cmd: &StageCommand) -> Result<ProcessResult> {
        self.run_line(cmd.stage().name(), &cmd.line()).await
    }

    /// Runs a stage command the caller does not need output from.
    async fn run_detached(&self, cmd: &StageCommand) -> Result<()> {
        self.run(cmd).await.map(|_| ())
    }
}

/// Runs commands with `<shell> -c <line>`, racing the child against interrupts.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    guard: Arc<RunGuard>,
}

impl ShellRunner {
    /// Creates a runner using `shell`.
    #[must_use]
    pub fn new(shell: impl Into<String>, guard: Arc<RunGuard>) -> Self {
        Self {
            shell: shell.into(),
            guard,
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run_line(&self, label: &str, line: &str) -> Result<ProcessResult> {
        debug!(command = %label, line = %line, "Running command");
        let started = Instant::now();

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on interrupt kills the child.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            () = self.guard.interrupted() => {
                self.guard.terminate_group(TeardownReason::Interrupt);
                return Err(QpipelineError::Interrupted);
            }
        };

        let result = ProcessResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            elapsed: started.elapsed(),
        };
        debug!(
            command = %label,
            exit_code = ?result.exit_code,
            elapsed_ms = result.elapsed.as_millis(),
            "Command finished"
        );

        if result.is_success() {
            Ok(result)
        } else {
            error!(command = %label, stderr = %result.stderr, "Command failed");
            Err(QpipelineError::Submission {
                stage: label.to_string(),
                code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProcessGroup;

    fn runner() -> (Arc<RunGuard>, ShellRunner) {
        let guard = Arc::new(
            RunGuard::detached(Arc::new(RecordingProcessGroup::new())).with_quiet(true),
        );
        (guard.clone(), ShellRunner::new("sh", guard))
    }

    #[tokio::test]
    async fn test_captures_and_trims_output() {
        let (_guard, runner) = runner();
        let result = runner
            .run_line("echo", "echo '  hello  '; echo oops >&2")
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_submission_error() {
        let (_guard, runner) = runner();
        let err = runner
            .run_line("broken", "echo 'no such image' >&2; exit 3")
            .await
            .unwrap_err();

        match err {
            QpipelineError::Submission { stage, code, stderr } => {
                assert_eq!(stage, "broken");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "no such image");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_kills_in_flight_child() {
        let (guard, runner) = runner();
        let interrupter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                guard.interrupt();
            })
        };

        let started = Instant::now();
        let err = runner.run_line("sleep", "sleep 30").await.unwrap_err();
        interrupter.await.unwrap();

        assert!(matches!(err, QpipelineError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(guard.is_terminated());
    }

    #[test]
    fn test_process_result_helpers() {
        assert!(ProcessResult::success("ok").is_success());
        assert!(!ProcessResult::failure(1, "bad").is_success());
    }
}
