//! External process execution.

mod runner;

pub use runner::{ProcessResult, ProcessRunner, ShellRunner};
