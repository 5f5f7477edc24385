//! Configuration types and the per-invocation run context.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::errors::{QpipelineError, Result};

/// Characters allowed in names that end up in paths and scheduler directives.
#[allow(clippy::expect_used)]
static PLAIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid name pattern"));

/// Environment variable holding the container image reference.
pub const DEFAULT_CONTAINER_ENV: &str = "QUNEXCONIMAGE";

/// Top-level configuration, optionally loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Environment variable the container reference is read from.
    #[serde(default = "default_container_env")]
    pub container_env: String,
    /// Shell used to run external command lines.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Program queried with a job id for scheduler status.
    #[serde(default = "default_status_program")]
    pub status_program: String,
    /// Scheduler resource request.
    #[serde(default)]
    pub scheduler: SchedulerResources,
    /// Queue monitor timings.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

fn default_container_env() -> String {
    DEFAULT_CONTAINER_ENV.to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_status_program() -> String {
    "jobinfo".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            container_env: default_container_env(),
            shell: default_shell(),
            status_program: default_status_program(),
            scheduler: SchedulerResources::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            QpipelineError::config(format!("Unable to read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            QpipelineError::config(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// Sets the status program.
    #[must_use]
    pub fn with_status_program(mut self, program: impl Into<String>) -> Self {
        self.status_program = program.into();
        self
    }

    /// Sets the monitor settings.
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorSettings) -> Self {
        self.monitor = monitor;
        self
    }

    /// Reads the container reference from the configured environment variable.
    pub fn container_from_env(&self) -> Result<String> {
        container_from_env(&self.container_env)
    }
}

/// Reads a container reference from `var`, trimming trailing whitespace.
pub fn container_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim_end().to_string()),
        _ => Err(QpipelineError::config(format!(
            "{var} is not set. Please export the path to the container image"
        ))),
    }
}

/// Resource request attached to scheduler submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerResources {
    /// Scheduler kind understood by the container runner.
    #[serde(default = "default_scheduler_kind")]
    pub kind: String,
    /// Wall-clock limit.
    #[serde(default = "default_time")]
    pub time: String,
    /// Number of tasks.
    #[serde(default = "default_one")]
    pub ntasks: u32,
    /// CPUs per task.
    #[serde(default = "default_one")]
    pub cpus_per_task: u32,
    /// Memory per CPU in MB.
    #[serde(default = "default_mem_per_cpu")]
    pub mem_per_cpu: u32,
    /// Quality of service.
    #[serde(default = "default_qos")]
    pub qos: String,
    /// Generic resource request for GPU stages; `None` never requests one.
    #[serde(default = "default_gres")]
    pub gres: Option<String>,
    /// Commands run on the compute node before the container starts.
    #[serde(default = "default_bash_pre")]
    pub bash_pre: Option<String>,
}

fn default_scheduler_kind() -> String {
    "SLURM".to_string()
}

fn default_time() -> String {
    "24:00:00".to_string()
}

const fn default_one() -> u32 {
    1
}

const fn default_mem_per_cpu() -> u32 {
    50_000
}

fn default_qos() -> String {
    "img".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_gres() -> Option<String> {
    Some("gpu:1".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_bash_pre() -> Option<String> {
    Some("module load qunex-img/0.100.0;module load cuda-img/9.1".to_string())
}

impl Default for SchedulerResources {
    fn default() -> Self {
        Self {
            kind: default_scheduler_kind(),
            time: default_time(),
            ntasks: default_one(),
            cpus_per_task: default_one(),
            mem_per_cpu: default_mem_per_cpu(),
            qos: default_qos(),
            gres: default_gres(),
            bash_pre: default_bash_pre(),
        }
    }
}

impl SchedulerResources {
    /// Renders the `--scheduler` directive value.
    #[must_use]
    pub fn directive(&self, partition: &str, job_name: &str, request_gpu: bool) -> String {
        let mut parts = vec![
            self.kind.clone(),
            format!("time={}", self.time),
            format!("ntasks={}", self.ntasks),
            format!("cpus-per-task={}", self.cpus_per_task),
            format!("mem-per-cpu={}", self.mem_per_cpu),
            format!("partition={partition}"),
            format!("qos={}", self.qos),
        ];
        if request_gpu {
            if let Some(ref gres) = self.gres {
                parts.push(format!("gres={gres}"));
            }
        }
        parts.push(format!("jobname={job_name}"));
        parts.join(",")
    }
}

/// Timings for the queue monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Delay before the first status query, covering scheduling latency.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Interval between status queries.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Progress indicator frame interval.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Whether to render the progress indicator.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

const fn default_initial_delay_ms() -> u64 {
    30_000
}

const fn default_poll_interval_ms() -> u64 {
    60_000
}

const fn default_tick_ms() -> u64 {
    200
}

const fn default_show_progress() -> bool {
    true
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            tick_ms: default_tick_ms(),
            show_progress: default_show_progress(),
        }
    }
}

impl MonitorSettings {
    /// Sets the initial grace delay.
    #[must_use]
    pub const fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the progress indicator frame interval.
    #[must_use]
    pub const fn with_tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms;
        self
    }

    /// Enables or disables the progress indicator.
    #[must_use]
    pub const fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Initial delay as Duration.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Poll interval as Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Indicator tick as Duration.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Stage-specific switches supplied by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    /// The T2 image is a FLAIR acquisition.
    pub flair: bool,
    /// Run diffusion without GPU acceleration.
    pub no_gpu: bool,
}

/// The per-invocation parameter bundle. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    study_folder: PathBuf,
    subject_id: String,
    container: String,
    queue: Option<String>,
    raw_data: Option<PathBuf>,
    flags: StageFlags,
    scheduler: SchedulerResources,
}

impl RunContext {
    /// Validates the inputs and builds a run context.
    ///
    /// An empty queue is treated as "run locally".
    pub fn new(
        study_folder: impl Into<PathBuf>,
        subject_id: impl Into<String>,
        container: impl Into<String>,
        queue: Option<String>,
    ) -> Result<Self> {
        let study_folder = study_folder.into();
        let subject_id = subject_id.into();
        let container = container.into();

        if study_folder.as_os_str().is_empty() {
            return Err(QpipelineError::config(
                "Missing study_folder argument. Please specify with --study_folder.",
            ));
        }
        if !study_folder.is_absolute() {
            return Err(QpipelineError::config(format!(
                "{} is not absolute path. Qunex needs absolute paths",
                study_folder.display()
            )));
        }
        if subject_id.trim().is_empty() {
            return Err(QpipelineError::config(
                "Missing id argument. Please specify with --id.",
            ));
        }
        check_subject_id(&subject_id)?;
        if container.trim().is_empty() {
            return Err(QpipelineError::config("Missing container image reference"));
        }
        let queue = queue.filter(|q| !q.trim().is_empty());
        if let Some(ref queue) = queue {
            if !PLAIN_NAME.is_match(queue) {
                return Err(QpipelineError::config(format!(
                    "Invalid queue '{queue}': only letters, digits, '.', '_' and '-' are allowed"
                )));
            }
        }

        Ok(Self {
            study_folder,
            subject_id,
            container,
            queue,
            raw_data: None,
            flags: StageFlags::default(),
            scheduler: SchedulerResources::default(),
        })
    }

    /// Sets the stage flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: StageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the raw BIDS data folder used by the setup stages.
    #[must_use]
    pub fn with_raw_data(mut self, raw_data: impl Into<PathBuf>) -> Self {
        self.raw_data = Some(raw_data.into());
        self
    }

    /// Sets the scheduler resource request.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerResources) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Study root path.
    #[must_use]
    pub fn study_folder(&self) -> &Path {
        &self.study_folder
    }

    /// Subject identifier.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Container image reference.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Scheduler partition, if the run is submitted to a queue.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Raw BIDS data folder, if this run imports data.
    #[must_use]
    pub fn raw_data(&self) -> Option<&Path> {
        self.raw_data.as_deref()
    }

    /// Stage flags.
    #[must_use]
    pub const fn flags(&self) -> StageFlags {
        self.flags
    }

    /// Scheduler resource request.
    #[must_use]
    pub const fn scheduler(&self) -> &SchedulerResources {
        &self.scheduler
    }

    /// The subject's study directory: `<study_folder>/<subject_id>`.
    #[must_use]
    pub fn run_root(&self) -> PathBuf {
        self.study_folder.join(&self.subject_id)
    }
}

/// The subject id names one directory directly under the study folder and
/// is part of the scheduler job name.
fn check_subject_id(subject_id: &str) -> Result<()> {
    let mut components = Path::new(subject_id).components();
    let single_dir = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_dir || !PLAIN_NAME.is_match(subject_id) {
        return Err(QpipelineError::config(format!(
            "Invalid id '{subject_id}': must be a single folder name of letters, digits, '.', '_' or '-'"
        )));
    }
    Ok(())
}
