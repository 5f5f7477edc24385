//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use tracing::info;

use super::{
    PIPELINE_COMPLETED, STAGE_COMPLETED, STAGE_SKIPPED, STAGE_STARTED, STAGE_SUBMITTED,
};

/// Trait for event sinks that can receive events.
///
/// The orchestrator reports stage transitions through a sink so operator
/// output stays separate from diagnostic logging.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Sends stage events to `tracing` at info level instead of the terminal.
///
/// Used with `--quiet`, where operator lines are suppressed but the run
/// should still be reconstructable from the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

fn describe(event_type: &str, data: Option<&serde_json::Value>) -> String {
    render(event_type, data).unwrap_or_else(|| event_type.to_string())
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let data = data.as_ref();
        info!(
            event = event_type,
            stage = field(data, "stage"),
            job_id = field(data, "job_id"),
            "{}",
            describe(event_type, data)
        );
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Event type, one of the `events` constants.
    pub event_type: String,
    /// The `stage` field of the payload, when present.
    pub stage: Option<String>,
    /// Full payload as emitted.
    pub data: Option<serde_json::Value>,
}

/// Records every event in arrival order. Test use.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Event types in the order they were emitted.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Number of events of exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Stage names carried by events of `event_type`, in order.
    #[must_use]
    pub fn stages(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter_map(|e| e.stage.clone())
            .collect()
    }

    fn record(&self, event_type: &str, data: Option<serde_json::Value>) {
        let stage = field(data.as_ref(), "stage").map(String::from);
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            stage,
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data);
    }
}

fn field<'a>(data: Option<&'a serde_json::Value>, key: &str) -> Option<&'a str> {
    data.and_then(|d| d.get(key)).and_then(serde_json::Value::as_str)
}

/// Prints operator-facing progress lines.
pub struct ConsoleEventSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for ConsoleEventSink {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl ConsoleEventSink {
    /// Creates a console sink writing to `out`.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn print(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if let Some(line) = render(event_type, data) {
            let mut out = self.out.lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }
}

impl std::fmt::Debug for ConsoleEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleEventSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for ConsoleEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.print(event_type, data.as_ref());
    }
}

/// Renders the operator line for an event, if it has one.
///
/// Failures are not rendered here; the fatal exit path reports them.
#[must_use]
pub fn render(event_type: &str, data: Option<&serde_json::Value>) -> Option<String> {
    let title = field(data, "title").unwrap_or_default();

    match event_type {
        STAGE_SKIPPED => Some(format!("{title} already completed, skipping")),
        STAGE_STARTED => Some(format!("Running {title}")),
        STAGE_SUBMITTED => Some(format!(
            "{title} submitted as job {}",
            field(data, "job_id").unwrap_or_default()
        )),
        STAGE_COMPLETED => Some(format!("{title} done")),
        PIPELINE_COMPLETED => Some(format!(
            "Finished {}",
            field(data, "pipeline").unwrap_or_default()
        )),
        _ => None,
    }
}
