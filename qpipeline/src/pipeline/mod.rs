//! Pipeline definitions and the stage orchestrator.
//!
//! This module provides:
//! - The fixed stage lists per pipeline
//! - Stage hooks for work attached to individual stages
//! - The orchestrator and its run summary

mod hooks;
mod orchestrator;
mod plan;
mod summary;

pub use hooks::{NoHooks, StageHooks};
pub use orchestrator::StageOrchestrator;
pub use plan::PipelineKind;
pub use summary::{RunSummary, StageOutcome};
