//! qpipeline CLI entry point.
//!
//! Usage:
//!   qpipeline setup -s <study> -r <raw> -i <id> (--data_type <type> | --batch <file>)
//!   qpipeline structural -s <study> -i <id> [-q <queue>] [--flair]
//!   qpipeline diffusion -s <study> -i <id> [-q <queue>] [--no_gpu]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use qpipeline::cancellation::{OsProcessGroup, RunGuard, TeardownReason};
use qpipeline::config::{PipelineConfig, RunContext, StageFlags};
use qpipeline::errors::{QpipelineError, EXIT_FAILURE};
use qpipeline::events::{ConsoleEventSink, EventSink, LoggingEventSink};
use qpipeline::pipeline::{PipelineKind, RunSummary, StageOrchestrator};
use qpipeline::process::{ProcessRunner, ShellRunner};
use qpipeline::scheduler::{QueueMonitor, SchedulerStatusCommand};
use qpipeline::setup::{
    check_bids_folder, check_paths_absolute, create_run_root, BatchSource, DataType, SetupHooks,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SPLASH: &str = r"
               .__                 .__   .__
  ____________  |__|______    ____  |  |  |__|  ____    ____
 / ____/\____ \ |  |\____ \ _/ __ \ |  |  |  | /    \ _/ __ \
< <_|  ||  |_> >|  ||  |_> >\  ___/ |  |__|  ||   |  \\  ___/
 \__   ||   __/ |__||   __/  \___  >|____/|__||___|  / \___  >
    |__||__|        |__|         \/                \/      \/
";

#[derive(Parser, Debug)]
#[command(name = "qpipeline", version, about, before_help = SPLASH)]
struct Cli {
    /// JSON configuration file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress operator messages
    #[arg(long, global = true)]
    quiet: bool,

    /// Write logs to stderr as JSON lines
    #[arg(long = "log_json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set up a QuNex study for a subject from BIDS data
    Setup(SetupArgs),
    /// Run the HCP structural pipeline
    Structural(StructuralArgs),
    /// Run the HCP diffusion pipeline
    Diffusion(DiffusionArgs),
}

#[derive(Args, Debug, Clone)]
struct SubjectArgs {
    /// Path to study folder
    #[arg(short = 's', long = "study_folder")]
    study_folder: PathBuf,

    /// Subject ID
    #[arg(short = 'i', long = "id")]
    id: String,

    /// Queue name to submit to. Runs locally when omitted
    #[arg(short = 'q', long = "queue")]
    queue: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct SetupArgs {
    #[command(flatten)]
    subject: SubjectArgs,

    /// Path to raw BIDS data
    #[arg(short = 'r', long = "raw_data")]
    raw_data: PathBuf,

    /// Data type {hcp,biobank}
    #[arg(short = 'd', long = "data_type")]
    data_type: Option<DataType>,

    /// Custom batch parameter file
    #[arg(short = 'b', long = "batch")]
    batch: Option<PathBuf>,

    /// Remove any existing subject folder first
    #[arg(short = 'o', long = "overwrite")]
    overwrite: bool,
}

#[derive(Args, Debug, Clone)]
struct StructuralArgs {
    #[command(flatten)]
    subject: SubjectArgs,

    /// T2 image is a FLAIR acquisition
    #[arg(long = "flair")]
    flair: bool,
}

#[derive(Args, Debug, Clone)]
struct DiffusionArgs {
    #[command(flatten)]
    subject: SubjectArgs,

    /// Run without GPU acceleration
    #[arg(long = "no_gpu")]
    no_gpu: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let guard = match RunGuard::acquire(Arc::new(OsProcessGroup)) {
        Ok(guard) => Arc::new(guard.with_quiet(cli.quiet)),
        Err(e) => {
            print_error(&format!("Unable to install signal handling: {e}"));
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match run(&cli, &guard).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                executed = summary.executed().len(),
                skipped = summary.skipped().len(),
                "Run finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => fatal(&guard, &err, cli.quiet),
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // RUST_LOG wins over -v
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(cli: &Cli, guard: &Arc<RunGuard>) -> Result<RunSummary> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match &cli.command {
        Command::Setup(args) => run_setup(cli, &config, guard, args).await,
        Command::Structural(args) => {
            let flags = StageFlags {
                flair: args.flair,
                no_gpu: false,
            };
            let ctx = context(&config, &args.subject, flags)?;
            let summary = orchestrator(cli, &config, guard, ctx)
                .run(PipelineKind::Structural)
                .await?;
            Ok(summary)
        }
        Command::Diffusion(args) => {
            let flags = StageFlags {
                flair: false,
                no_gpu: args.no_gpu,
            };
            let ctx = context(&config, &args.subject, flags)?;
            let summary = orchestrator(cli, &config, guard, ctx)
                .run(PipelineKind::Diffusion)
                .await?;
            Ok(summary)
        }
    }
}

async fn run_setup(
    cli: &Cli,
    config: &PipelineConfig,
    guard: &Arc<RunGuard>,
    args: &SetupArgs,
) -> Result<RunSummary> {
    check_paths_absolute(&[args.subject.study_folder.as_path(), args.raw_data.as_path()])?;
    let batch = BatchSource::select(args.data_type, args.batch.clone())?;
    check_bids_folder(&args.raw_data)?;

    let ctx = context(config, &args.subject, StageFlags::default())?.with_raw_data(&args.raw_data);
    let run_root = ctx.run_root();

    if !cli.quiet {
        println!("Setting up Subjects");
        println!("Data type: {batch}");
        if args.overwrite {
            println!("Overwriting {}", run_root.display());
        }
    }
    create_run_root(&run_root, args.overwrite)?;

    let summary = orchestrator(cli, config, guard, ctx)
        .with_hooks(Arc::new(SetupHooks::new(run_root, batch)))
        .run(PipelineKind::Setup)
        .await?;
    Ok(summary)
}

fn context(config: &PipelineConfig, subject: &SubjectArgs, flags: StageFlags) -> Result<RunContext> {
    let container = config.container_from_env()?;
    let ctx = RunContext::new(
        &subject.study_folder,
        &subject.id,
        container,
        subject.queue.clone(),
    )?
    .with_flags(flags)
    .with_scheduler(config.scheduler.clone());
    Ok(ctx)
}

fn orchestrator(
    cli: &Cli,
    config: &PipelineConfig,
    guard: &Arc<RunGuard>,
    ctx: RunContext,
) -> StageOrchestrator {
    let runner: Arc<dyn ProcessRunner> = Arc::new(ShellRunner::new(&config.shell, guard.clone()));
    let status = Arc::new(SchedulerStatusCommand::new(
        runner.clone(),
        &config.status_program,
    ));
    let monitor = QueueMonitor::new(status, guard.clone(), config.monitor.clone());
    let events: Arc<dyn EventSink> = if cli.quiet {
        Arc::new(LoggingEventSink::default())
    } else {
        Arc::new(ConsoleEventSink::default())
    };

    StageOrchestrator::new(ctx, runner, monitor, guard.clone()).with_events(events)
}

/// The single exit path for every failure: tear the process group down when
/// children may exist, report the error and map it to an exit status.
fn fatal(guard: &RunGuard, err: &anyhow::Error, quiet: bool) -> ExitCode {
    let lib = err.downcast_ref::<QpipelineError>();
    if lib.is_some_and(QpipelineError::requires_teardown) {
        guard.terminate_group(TeardownReason::Fatal);
    }
    if !matches!(lib, Some(QpipelineError::Interrupted)) {
        print_error(&format!("{err:#}"));
    }
    if !quiet {
        println!("Exiting...");
    }
    ExitCode::from(exit_status(err))
}

fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<QpipelineError>()
        .map_or(EXIT_FAILURE, QpipelineError::exit_code)
}

fn print_error(message: &str) {
    eprintln!("\x1b[1;31m{message}\x1b[0;0m");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_structural() {
        let cli = Cli::try_parse_from([
            "qpipeline",
            "structural",
            "--study_folder",
            "/data/study",
            "--id",
            "sub01",
            "-q",
            "himem",
            "--flair",
        ])
        .unwrap();

        match cli.command {
            Command::Structural(args) => {
                assert_eq!(args.subject.id, "sub01");
                assert_eq!(args.subject.queue.as_deref(), Some("himem"));
                assert!(args.flair);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_setup_data_type() {
        let cli = Cli::try_parse_from([
            "qpipeline",
            "setup",
            "-s",
            "/data/study",
            "-r",
            "/data/raw",
            "-i",
            "sub01",
            "--data_type",
            "biobank",
        ])
        .unwrap();

        match cli.command {
            Command::Setup(args) => {
                assert_eq!(args.data_type, Some(DataType::Biobank));
                assert!(args.batch.is_none());
                assert!(!args.overwrite);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_data_type_rejected() {
        let result = Cli::try_parse_from([
            "qpipeline", "setup", "-s", "/s", "-r", "/r", "-i", "x", "--data_type", "ukb",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_diffusion_requires_id() {
        assert!(Cli::try_parse_from(["qpipeline", "diffusion", "-s", "/data/study"]).is_err());
    }

    #[test]
    fn test_exit_status_mapping() {
        let interrupted = anyhow::Error::new(QpipelineError::Interrupted);
        assert_eq!(exit_status(&interrupted), 130);

        let post_check = anyhow::Error::new(QpipelineError::PostCheck {
            stage: "freesurfer".to_string(),
            marker_dir: "/tmp".to_string(),
        })
        .context("Running structural");
        assert_eq!(exit_status(&post_check), 1);

        assert_eq!(exit_status(&anyhow::anyhow!("other")), 1);
    }
}
