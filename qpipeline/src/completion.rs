//! Completion marker inspection.
//!
//! The external toolchain writes a marker file into the run's command-log
//! directory once a stage has succeeded. This module only ever reads that
//! directory; markers are never created or removed here.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::{MarkerStyle, Stage};

/// Marker directory, relative to the run root.
pub const MARKER_DIR: &str = "processing/logs/comlogs";

/// Returns true if at least one marker for `stage_name` exists under `run_root`.
///
/// A missing or unreadable marker directory counts as "not completed".
#[must_use]
pub fn has_completed(run_root: &Path, stage_name: &str, style: MarkerStyle) -> bool {
    let dir = run_root.join(MARKER_DIR);
    let prefix = style.marker_prefix(stage_name);

    let Ok(entries) = std::fs::read_dir(&dir) else {
        debug!(dir = %dir.display(), "Marker directory not readable");
        return false;
    };

    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| !t.is_dir()))
        .any(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
}

/// Checks completion markers for one run root.
#[derive(Debug, Clone)]
pub struct CompletionChecker {
    run_root: PathBuf,
}

impl CompletionChecker {
    /// Creates a checker for `run_root`.
    #[must_use]
    pub fn new(run_root: impl Into<PathBuf>) -> Self {
        Self {
            run_root: run_root.into(),
        }
    }

    /// Returns the directory markers are searched in.
    #[must_use]
    pub fn marker_dir(&self) -> PathBuf {
        self.run_root.join(MARKER_DIR)
    }

    /// Returns true if `stage` has a completion marker.
    #[must_use]
    pub fn has_completed(&self, stage: Stage) -> bool {
        let done = has_completed(&self.run_root, stage.name(), stage.marker_style());
        debug!(stage = %stage, done, "Checked completion marker");
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn marker_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(MARKER_DIR)).unwrap();
        dir
    }

    fn touch(root: &Path, name: &str) {
        std::fs::write(root.join(MARKER_DIR).join(name), b"").unwrap();
    }

    #[test]
    fn test_missing_directory_is_not_completed() {
        let dir = TempDir::new().unwrap();
        assert!(!has_completed(dir.path(), "freesurfer", MarkerStyle::Processing));
    }

    #[test]
    fn test_processing_marker_found() {
        let dir = marker_root();
        touch(dir.path(), "done_hcp_freesurfer_sub01_2024-01-01_12.00.00.log");

        assert!(has_completed(dir.path(), "freesurfer", MarkerStyle::Processing));
        assert!(!has_completed(dir.path(), "pre_freesurfer", MarkerStyle::Processing));
    }

    #[test]
    fn test_setup_and_processing_conventions_differ() {
        let dir = marker_root();
        touch(dir.path(), "done_create_study.log");

        assert!(has_completed(dir.path(), "create_study", MarkerStyle::Setup));
        assert!(!has_completed(dir.path(), "create_study", MarkerStyle::Processing));
    }

    #[test]
    fn test_marker_contents_are_ignored() {
        let dir = marker_root();
        std::fs::write(
            dir.path().join(MARKER_DIR).join("done_hcp_diffusion.log"),
            b"ERROR: anything",
        )
        .unwrap();
        let checker = CompletionChecker::new(dir.path());
        assert!(checker.has_completed(Stage::Diffusion));
    }

    #[test]
    fn test_directories_are_not_markers() {
        let dir = marker_root();
        std::fs::create_dir(dir.path().join(MARKER_DIR).join("done_hcp_diffusion")).unwrap();
        let checker = CompletionChecker::new(dir.path());
        assert!(!checker.has_completed(Stage::Diffusion));
    }

    #[test]
    fn test_checker_uses_stage_convention() {
        let dir = marker_root();
        touch(dir.path(), "done_setup_hcp.log");
        touch(dir.path(), "done_hcp_post_freesurfer.log");

        let checker = CompletionChecker::new(dir.path());
        assert!(checker.has_completed(Stage::SetupHcp));
        assert!(checker.has_completed(Stage::PostFreesurfer));
        assert!(!checker.has_completed(Stage::Freesurfer));
        assert_eq!(checker.marker_dir(), dir.path().join("processing/logs/comlogs"));
    }
}
