//! Pipeline stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the external toolchain names a stage's completion marker.
///
/// The study-setup commands and the HCP processing commands come from two
/// different tool families that write their markers differently, so both
/// conventions are kept side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    /// `done_<stage>*`
    Setup,
    /// `done_hcp_<stage>*`
    Processing,
}

impl MarkerStyle {
    /// Returns the marker filename prefix for a stage name.
    #[must_use]
    pub fn marker_prefix(self, stage_name: &str) -> String {
        match self {
            Self::Setup => format!("done_{stage_name}"),
            Self::Processing => format!("done_hcp_{stage_name}"),
        }
    }
}

/// One discrete unit of the processing pipeline.
///
/// Every stage maps to exactly one `qunex_container` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Create the study folder structure.
    CreateStudy,
    /// Import the BIDS raw data into the sessions folder.
    ImportBids,
    /// Create session information from the scan mapping file.
    CreateSessionInfo,
    /// Create the batch file from the parameter template.
    CreateBatch,
    /// Map imaged data into the HCP folder layout.
    SetupHcp,
    /// HCP PreFreeSurfer.
    PreFreesurfer,
    /// HCP FreeSurfer.
    Freesurfer,
    /// HCP PostFreeSurfer.
    PostFreesurfer,
    /// HCP diffusion preprocessing.
    Diffusion,
}

impl Stage {
    /// Returns the stage name as used in markers and job names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateStudy => "create_study",
            Self::ImportBids => "import_bids",
            Self::CreateSessionInfo => "create_session_info",
            Self::CreateBatch => "create_batch",
            Self::SetupHcp => "setup_hcp",
            Self::PreFreesurfer => "pre_freesurfer",
            Self::Freesurfer => "freesurfer",
            Self::PostFreesurfer => "post_freesurfer",
            Self::Diffusion => "diffusion",
        }
    }

    /// Returns the `qunex_container` command that runs this stage.
    #[must_use]
    pub const fn qunex_command(self) -> &'static str {
        match self {
            Self::CreateStudy => "create_study",
            Self::ImportBids => "import_bids",
            Self::CreateSessionInfo => "create_session_info",
            Self::CreateBatch => "create_batch",
            Self::SetupHcp => "setup_hcp",
            Self::PreFreesurfer => "hcp_pre_freesurfer",
            Self::Freesurfer => "hcp_freesurfer",
            Self::PostFreesurfer => "hcp_post_freesurfer",
            Self::Diffusion => "hcp_diffusion",
        }
    }

    /// Returns the marker naming convention for this stage.
    #[must_use]
    pub const fn marker_style(self) -> MarkerStyle {
        match self {
            Self::CreateStudy
            | Self::ImportBids
            | Self::CreateSessionInfo
            | Self::CreateBatch
            | Self::SetupHcp => MarkerStyle::Setup,
            Self::PreFreesurfer | Self::Freesurfer | Self::PostFreesurfer | Self::Diffusion => {
                MarkerStyle::Processing
            }
        }
    }

    /// Returns true if the stage may be submitted to a batch scheduler.
    ///
    /// Setup stages are short and always run in the foreground.
    #[must_use]
    pub const fn is_schedulable(self) -> bool {
        matches!(self.marker_style(), MarkerStyle::Processing)
    }

    /// Returns the marker filename prefix for this stage.
    #[must_use]
    pub fn marker_prefix(self) -> String {
        self.marker_style().marker_prefix(self.name())
    }

    /// Operator-facing title, e.g. `pre_freesurfer` becomes `Pre-Freesurfer`.
    #[must_use]
    pub fn title(self) -> String {
        self.name()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect()
                })
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_are_unique() {
        let all = crate::pipeline::PipelineKind::ALL
            .iter()
            .flat_map(|kind| kind.stages())
            .collect::<Vec<_>>();
        let mut names: Vec<_> = all.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 9);
        assert_eq!(Stage::Freesurfer.qunex_command(), "hcp_freesurfer");
    }

    #[test]
    fn test_stage_title() {
        assert_eq!(Stage::PreFreesurfer.title(), "Pre-Freesurfer");
        assert_eq!(Stage::Freesurfer.title(), "Freesurfer");
        assert_eq!(Stage::CreateSessionInfo.title(), "Create-Session-Info");
    }

    #[test]
    fn test_marker_prefixes_keep_both_conventions() {
        assert_eq!(Stage::PreFreesurfer.marker_prefix(), "done_hcp_pre_freesurfer");
        assert_eq!(Stage::Diffusion.marker_prefix(), "done_hcp_diffusion");
        assert_eq!(Stage::CreateStudy.marker_prefix(), "done_create_study");
        assert_eq!(Stage::SetupHcp.marker_prefix(), "done_setup_hcp");
    }

    #[test]
    fn test_only_processing_stages_are_schedulable() {
        assert!(Stage::Freesurfer.is_schedulable());
        assert!(Stage::Diffusion.is_schedulable());
        assert!(!Stage::ImportBids.is_schedulable());
        assert!(!Stage::CreateBatch.is_schedulable());
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&Stage::PostFreesurfer).unwrap();
        assert_eq!(json, r#""post_freesurfer""#);
    }
}
