//! External command construction.

mod builder;

pub use builder::{build_command, StageCommand, CONTAINER_RUNNER, FLAIR_FLAG, NO_GPU_FLAG};
