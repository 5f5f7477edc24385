//! Study folder preparation: input checks, folders and the batch template.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::mapping::MAPPING_FILE;
use crate::errors::{QpipelineError, Result};

/// Batch parameter file name, relative to the run root.
pub const BATCH_FILE: &str = "hcp_batch.txt";

const HCP_BATCH: &str = include_str!("../../files/hcp_data_batch.txt");
const BIOBANK_BATCH: &str = include_str!("../../files/biobank_data_batch.txt");

/// Acquisition protocol the raw data follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Human Connectome Project style data.
    Hcp,
    /// UK Biobank style data.
    Biobank,
}

impl DataType {
    /// The built-in batch parameter template.
    #[must_use]
    pub const fn batch_template(self) -> &'static str {
        match self {
            Self::Hcp => HCP_BATCH,
            Self::Biobank => BIOBANK_BATCH,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hcp => write!(f, "hcp"),
            Self::Biobank => write!(f, "biobank"),
        }
    }
}

impl FromStr for DataType {
    type Err = QpipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hcp" => Ok(Self::Hcp),
            "biobank" => Ok(Self::Biobank),
            other => Err(QpipelineError::config(format!(
                "Unknown data type {other}. Valid data types are hcp and biobank"
            ))),
        }
    }
}

/// Where the batch parameters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    /// A template shipped with the tool.
    Builtin(DataType),
    /// A user-supplied parameter file.
    Custom(PathBuf),
}

impl BatchSource {
    /// Picks the batch source. A custom file wins over a data type.
    pub fn select(data_type: Option<DataType>, custom: Option<PathBuf>) -> Result<Self> {
        match (custom, data_type) {
            (Some(path), _) => Ok(Self::Custom(path)),
            (None, Some(data_type)) => Ok(Self::Builtin(data_type)),
            (None, None) => Err(QpipelineError::config(
                "Please provide either datatype --data_type {hcp,biobank} or custom batch with --batch",
            )),
        }
    }

    /// Copies the parameters to `<run_root>/hcp_batch.txt`.
    pub fn write_to(&self, run_root: &Path) -> Result<PathBuf> {
        let target = run_root.join(BATCH_FILE);
        match self {
            Self::Builtin(data_type) => std::fs::write(&target, data_type.batch_template())?,
            Self::Custom(path) => {
                std::fs::copy(path, &target).map_err(|e| {
                    QpipelineError::config(format!(
                        "Unable to copy {} to {} due to {e}",
                        path.display(),
                        target.display()
                    ))
                })?;
            }
        }
        debug!(path = %target.display(), source = %self, "Wrote batch parameters");
        Ok(target)
    }
}

impl fmt::Display for BatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(data_type) => write!(f, "{data_type}"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Fails unless every path is absolute.
pub fn check_paths_absolute(paths: &[&Path]) -> Result<()> {
    match paths.iter().find(|p| !p.is_absolute()) {
        Some(path) => Err(QpipelineError::config(format!(
            "{} is not absolute path. Qunex needs absolute paths",
            path.display()
        ))),
        None => Ok(()),
    }
}

/// Checks the minimal BIDS layout the import needs: non-empty `anat` and
/// `dwi` directories somewhere under `bids_dir`.
pub fn check_bids_folder(bids_dir: &Path) -> Result<()> {
    if !bids_dir.is_dir() {
        return Err(QpipelineError::config("Bids Folder does not exists"));
    }
    for folder in ["anat", "dwi"] {
        if !contains_populated_dir(bids_dir, folder) {
            return Err(QpipelineError::config(format!(
                "{folder} not found. Please check bids directory"
            )));
        }
    }
    Ok(())
}

fn contains_populated_dir(root: &Path, name: &str) -> bool {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| {
            entry
                .map_err(|e| debug!(error = %e, "Skipping unreadable entry in bids folder"))
                .ok()
        })
        .filter(|entry| entry.file_type().is_dir() && entry.file_name() == name)
        .any(|entry| std::fs::read_dir(entry.path()).is_ok_and(|mut dir| dir.next().is_some()))
}

/// Creates the run root. With `overwrite`, an existing run root is removed
/// first; otherwise an existing one is reused so setup can resume.
pub fn create_run_root(run_root: &Path, overwrite: bool) -> Result<()> {
    if overwrite && run_root.exists() {
        info!(path = %run_root.display(), "Overwriting run root");
        std::fs::remove_dir_all(run_root)?;
    }
    std::fs::create_dir_all(run_root).map_err(|e| {
        QpipelineError::config(format!("Unable to create directory due to {e}"))
    })
}

/// Removes the batch and mapping files once setup has consumed them.
pub fn remove_temporary_files(run_root: &Path) -> Result<()> {
    for name in [BATCH_FILE, MAPPING_FILE] {
        match std::fs::remove_file(run_root.join(name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}
