#![forbid(unsafe_code)]

//! `voxherd` entry point: runs the process orchestrator, serves sessions and
//! stops daemons.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use voxherd::config::GlobalConfig;
use voxherd::lifecycle::{LifecycleController, StopAction};
use voxherd::orchestrator::Orchestrator;
use voxherd::registry::SessionRegistry;
use voxherd::session::SessionManager;
use voxherd::transport::multiplexer::TmuxMultiplexer;
use voxherd::{AppError, Result};

/// Bound on runtime shutdown; a pending terminal read never completes.
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "voxherd", about = "Voice assistant process orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch every configured process and report the first to exit.
    Run,

    /// Run the single injectable session of a kind in the foreground.
    Session {
        /// Session kind from `[sessions.<kind>]`.
        kind: String,
    },

    /// Stop a configured process, gracefully then forcibly.
    Stop {
        /// Process name from `[[processes]]`.
        name: String,
    },
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    if let Err(err) = block_on(args) {
        error!(%err, "voxherd failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn block_on(args: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
    result
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(config = %args.config.display(), "configuration loaded");

    match args.command {
        Command::Run => orchestrate(&config, &args.config).await,
        Command::Session { kind } => serve_session(&config, &kind).await,
        Command::Stop { name } => stop(&config, &name).await,
    }
}

async fn orchestrate(config: &GlobalConfig, config_path: &Path) -> Result<()> {
    let self_exe = std::env::current_exe()
        .map_err(|err| AppError::Config(format!("cannot locate own executable: {err}")))?;
    let config_path = config_path
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid config path: {err}")))?;

    let orchestrator = Orchestrator::new(
        config.process_specs(&self_exe, &config_path),
        config.poll_interval(),
    );
    let cancel = cancel_on_signal();

    let (outcome, failures) = orchestrator.run(&cancel).await;
    for failure in &failures {
        println!("{failure}");
    }
    println!("{outcome}");
    Ok(())
}

async fn serve_session(config: &GlobalConfig, kind: &str) -> Result<()> {
    let options = config.session_options(kind)?;
    let registry = SessionRegistry::open(config.registry_dir())?;
    let manager = SessionManager::new(registry, TmuxMultiplexer::new(config.tmux_binary.clone()));

    let cancel = cancel_on_signal();
    let handle = manager.create_session(&options).await?;
    let record = handle.record().clone();
    println!(
        "{kind} session ready ({:?} {})",
        record.transport.kind, record.transport.address
    );

    let end = handle.run(&cancel).await?;
    info!(kind, ?end, "session manager exiting");
    Ok(())
}

async fn stop(config: &GlobalConfig, name: &str) -> Result<()> {
    let target = config.daemon_target(name)?;
    let controller = LifecycleController::new(config.stop_policy());
    let report = controller.stop(&target).await?;

    if report.processes.is_empty() {
        println!("{name} was not running");
    }
    for process in &report.processes {
        let verb = match process.action {
            StopAction::AlreadyGone => "was already gone",
            StopAction::Terminated => "stopped",
            StopAction::Killed => "killed after grace period",
        };
        println!("{name} (pid {}) {verb}", process.pid);
    }
    Ok(())
}

/// Token cancelled on SIGINT, SIGTERM, or SIGHUP.
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        token.cancel();
    });
    cancel
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(mut sigterm), Ok(mut sighup)) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
                _ = sighup.recv() => {}
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!(%err, "failed to register signal handlers, using ctrl-c only");
            if let Err(err) = ctrl_c.await {
                error!(%err, "ctrl-c signal handler failed");
            }
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
