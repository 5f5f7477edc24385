//! Run-wide cancellation.
//!
//! A single [`RunGuard`] is acquired when the process starts. It owns the
//! process group, listens for interrupts and performs the exactly-once group
//! teardown used by both the interrupt path and every fatal error path.

mod guard;

pub use guard::{OsProcessGroup, ProcessGroup, RunGuard, TeardownReason};
