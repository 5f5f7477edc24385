//! Fake process runners and process groups.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cancellation::ProcessGroup;
use crate::completion::MARKER_DIR;
use crate::core::Stage;
use crate::errors::{QpipelineError, Result};
use crate::process::{ProcessResult, ProcessRunner};

#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<ProcessResult>,
    markers: Vec<PathBuf>,
}

impl Rule {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replies: VecDeque::new(),
            markers: Vec::new(),
        }
    }

    fn next_reply(&mut self) -> ProcessResult {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or_else(|| ProcessResult::success(""))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or_else(|| ProcessResult::success(""))
        }
    }
}

/// A runner that answers command lines from a script instead of spawning.
///
/// Each rule matches lines containing its pattern; the first matching rule
/// wins. Replies for a rule are consumed in order and the last one repeats.
/// Unmatched lines succeed with empty output. A rule can also write marker
/// files when it matches, imitating the external toolchain.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    lines: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Creates a runner with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reply` for lines containing `pattern`.
    #[must_use]
    pub fn on(self, pattern: &str, reply: ProcessResult) -> Self {
        self.rule(pattern, |rule| rule.replies.push_back(reply));
        self
    }

    /// Writes `marker` (creating parent directories) whenever `pattern` matches.
    #[must_use]
    pub fn writes_marker(self, pattern: &str, marker: impl Into<PathBuf>) -> Self {
        let marker = marker.into();
        self.rule(pattern, |rule| rule.markers.push(marker));
        self
    }

    fn rule(&self, pattern: &str, update: impl FnOnce(&mut Rule)) {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|r| r.pattern == pattern) {
            update(rule);
        } else {
            let mut rule = Rule::new(pattern);
            update(&mut rule);
            rules.push(rule);
        }
    }

    /// Every line run so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Number of lines run that contain `pattern`.
    #[must_use]
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(pattern)).count()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run_line(&self, label: &str, line: &str) -> Result<ProcessResult> {
        self.lines.lock().push(line.to_string());

        let (reply, markers) = {
            let mut rules = self.rules.lock();
            match rules.iter_mut().find(|r| line.contains(&r.pattern)) {
                Some(rule) => (rule.next_reply(), rule.markers.clone()),
                None => (ProcessResult::success(""), Vec::new()),
            }
        };

        for marker in markers {
            if let Some(parent) = marker.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&marker, b"")?;
        }

        if reply.is_success() {
            Ok(reply)
        } else {
            Err(QpipelineError::Submission {
                stage: label.to_string(),
                code: reply.exit_code,
                stderr: reply.stderr,
            })
        }
    }
}

/// A process group that records calls instead of signalling anything.
#[derive(Debug, Default)]
pub struct RecordingProcessGroup {
    leader_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingProcessGroup {
    /// Creates a recording group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call return an error after recording it.
    #[must_use]
    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Number of `become_leader` calls.
    #[must_use]
    pub fn leader_calls(&self) -> usize {
        self.leader_calls.load(Ordering::SeqCst)
    }

    /// Number of `terminate` calls.
    #[must_use]
    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "not permitted").into())
        } else {
            Ok(())
        }
    }
}

impl ProcessGroup for RecordingProcessGroup {
    fn become_leader(&self) -> Result<()> {
        self.leader_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    fn terminate(&self) -> Result<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }
}

/// Path of a completion marker for `stage` under `run_root`.
#[must_use]
pub fn marker_path(run_root: &Path, stage: Stage) -> PathBuf {
    run_root
        .join(MARKER_DIR)
        .join(format!("{}_test.log", stage.marker_prefix()))
}

/// Writes a completion marker for `stage` under `run_root`.
pub fn write_marker(run_root: &Path, stage: Stage) -> Result<()> {
    let path = marker_path(run_root, stage);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scripted_replies_repeat_last() {
        let runner = ScriptedRunner::new()
            .on("status", ProcessResult::success("PENDING"))
            .on("status", ProcessResult::success("Finished"));

        assert_eq!(runner.run_line("s", "status 1").await.unwrap().stdout, "PENDING");
        assert_eq!(runner.run_line("s", "status 1").await.unwrap().stdout, "Finished");
        assert_eq!(runner.run_line("s", "status 1").await.unwrap().stdout, "Finished");
        assert_eq!(runner.run_line("s", "other").await.unwrap().stdout, "");
        assert_eq!(runner.calls_matching("status"), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure_and_markers() {
        let dir = TempDir::new().unwrap();
        let marker = marker_path(dir.path(), Stage::Freesurfer);
        let runner = ScriptedRunner::new()
            .writes_marker("hcp_freesurfer", &marker)
            .on("broken", ProcessResult::failure(2, "bad flag"));

        runner.run_line("freesurfer", "qunex_container hcp_freesurfer").await.unwrap();
        assert!(marker.exists());

        let err = runner.run_line("broken", "broken cmd").await.unwrap_err();
        assert!(matches!(err, QpipelineError::Submission { code: Some(2), .. }));
    }

    #[test]
    fn test_recording_group_counts() {
        let group = RecordingProcessGroup::new();
        group.become_leader().unwrap();
        group.terminate().unwrap();
        group.terminate().unwrap();
        assert_eq!(group.leader_calls(), 1);
        assert_eq!(group.terminate_calls(), 2);
        assert!(RecordingProcessGroup::new().failing().terminate().is_err());
    }
}
