//! Core types: stages and their statuses.

mod stage;
mod status;

pub use stage::{MarkerStyle, Stage};
pub use status::StageStatus;
