//! File preparation around the setup stages.

use std::path::PathBuf;
use tracing::warn;

use super::mapping::ScanMapping;
use super::scaffold::{remove_temporary_files, BatchSource};
use crate::core::Stage;
use crate::errors::Result;
use crate::pipeline::StageHooks;
use crate::process::ProcessResult;

/// Writes the batch parameters before `create_batch`, builds the scan
/// mapping from the `import_bids` output, and removes both files after
/// `setup_hcp`.
#[derive(Debug, Clone)]
pub struct SetupHooks {
    run_root: PathBuf,
    batch: BatchSource,
}

impl SetupHooks {
    /// Creates setup hooks for `run_root`.
    #[must_use]
    pub fn new(run_root: impl Into<PathBuf>, batch: BatchSource) -> Self {
        Self {
            run_root: run_root.into(),
            batch,
        }
    }
}

impl StageHooks for SetupHooks {
    fn before_stage(&self, stage: Stage) -> Result<()> {
        if stage == Stage::CreateBatch {
            self.batch.write_to(&self.run_root)?;
        }
        Ok(())
    }

    fn after_stage(&self, stage: Stage, output: Option<&ProcessResult>) -> Result<()> {
        match stage {
            Stage::ImportBids => {
                let mapping = output.map(|o| ScanMapping::parse(&o.stdout)).unwrap_or_default();
                if mapping.is_empty() {
                    warn!("No linked scans found in import output; mapping file will be empty");
                }
                mapping.write_to(&self.run_root)?;
            }
            Stage::SetupHcp => remove_temporary_files(&self.run_root)?,
            _ => {}
        }
        Ok(())
    }

    fn needs_output(&self, stage: Stage) -> bool {
        stage == Stage::ImportBids
    }
}
