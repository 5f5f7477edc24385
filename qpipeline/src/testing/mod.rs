//! Test doubles for the external collaborators.
//!
//! This module provides:
//! - `ScriptedRunner`, a process runner answering from a script
//! - `RecordingProcessGroup`, a process group that counts teardown calls
//! - helpers for writing completion markers

mod mocks;

pub use mocks::{marker_path, write_marker, RecordingProcessGroup, ScriptedRunner};
