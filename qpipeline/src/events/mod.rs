//! Stage events and the sinks that receive them.

mod sink;

pub use sink::{
    render, CollectingEventSink, ConsoleEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    RecordedEvent,
};

/// A stage was already complete and was not run.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage command is about to run.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage was accepted by the scheduler.
pub const STAGE_SUBMITTED: &str = "stage.submitted";
/// A stage's completion marker was verified.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed and the run is aborting.
pub const STAGE_FAILED: &str = "stage.failed";
/// Every stage of the run completed.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
