//! Batch scheduler tracking.
//!
//! Parsing of submission and status text is kept in pure functions in
//! [`parse`] so it can be tested without a scheduler. [`QueueMonitor`] drives
//! the polling loop on top of them.

pub mod parse;
mod monitor;
mod progress;

pub use monitor::{JobReport, QueueMonitor, SchedulerStatusCommand, StatusQuery};
pub use parse::{extract_job_id, parse_status, JobHandle, JobState, JobStatus};
pub use progress::ProgressIndicator;
