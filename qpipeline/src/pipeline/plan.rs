//! The fixed stage lists for each pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::Stage;

/// A pipeline the orchestrator can run. Each has a fixed, linear stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Study creation, data import and HCP folder setup.
    Setup,
    /// PreFreeSurfer, FreeSurfer and PostFreeSurfer.
    Structural,
    /// Diffusion preprocessing.
    Diffusion,
}

impl PipelineKind {
    /// Every pipeline, in the order a fresh subject goes through them.
    #[cfg(test)]
    pub(crate) const ALL: [Self; 3] = [Self::Setup, Self::Structural, Self::Diffusion];

    /// Stages in execution order.
    #[must_use]
    pub const fn stages(self) -> &'static [Stage] {
        match self {
            Self::Setup => &[
                Stage::CreateStudy,
                Stage::ImportBids,
                Stage::CreateSessionInfo,
                Stage::CreateBatch,
                Stage::SetupHcp,
            ],
            Self::Structural => &[Stage::PreFreesurfer, Stage::Freesurfer, Stage::PostFreesurfer],
            Self::Diffusion => &[Stage::Diffusion],
        }
    }

    /// Pipeline name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Structural => "structural",
            Self::Diffusion => "diffusion",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MarkerStyle;

    #[test]
    fn test_structural_order() {
        assert_eq!(
            PipelineKind::Structural.stages(),
            &[Stage::PreFreesurfer, Stage::Freesurfer, Stage::PostFreesurfer]
        );
    }

    #[test]
    fn test_setup_uses_setup_markers_only() {
        assert!(PipelineKind::Setup
            .stages()
            .iter()
            .all(|s| s.marker_style() == MarkerStyle::Setup));
        assert!(PipelineKind::Diffusion
            .stages()
            .iter()
            .all(|s| s.marker_style() == MarkerStyle::Processing));
    }
}
