#![forbid(unsafe_code)]

//! `voxherd-ctl`: locate live sessions and inject commands into them.
//!
//! Reads the session registry directly; no server needs to be running.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use voxherd::config::{default_registry_dir, GlobalConfig};
use voxherd::process::is_alive;
use voxherd::registry::SessionRegistry;
use voxherd::transport::{inject_into_session, TransportOptions};
use voxherd::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "voxherd-ctl",
    about = "Inject commands into voxherd sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Registry directory (overrides the one from `--config`).
    #[arg(long)]
    registry_dir: Option<PathBuf>,

    /// Configuration file supplying the registry directory and transport
    /// settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Type a line into the live session of a kind.
    Inject {
        /// Session kind.
        #[arg(long, default_value = "claude")]
        kind: String,
        /// Text to inject; words are joined with spaces.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// List registered sessions with owner liveness.
    List,
}

fn main() {
    let args = Cli::parse();

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let config = args
        .config
        .as_deref()
        .map(GlobalConfig::load_from_path)
        .transpose()?;
    let registry_dir = args
        .registry_dir
        .clone()
        .or_else(|| config.as_ref().map(GlobalConfig::registry_dir))
        .unwrap_or_else(default_registry_dir);
    let registry = SessionRegistry::open(registry_dir)?;

    match args.command {
        Command::Inject { kind, text } => {
            let options = config
                .as_ref()
                .map(GlobalConfig::transport_options)
                .unwrap_or_default();
            let text = text.join(" ");
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|err| AppError::Io(format!("failed to build tokio runtime: {err}")))?;
            let record =
                runtime.block_on(inject_into_session(&registry, &kind, &text, &options))?;
            println!(
                "OK: injected into {kind} session (pid {})",
                record.owner_pid
            );
        }
        Command::List => {
            let records = registry.list_all()?;
            if records.is_empty() {
                println!("no sessions registered in {}", registry.dir().display());
            }
            for record in records {
                let state = if is_alive(record.owner_pid) {
                    "live"
                } else {
                    "stale"
                };
                println!(
                    "{}\t{}\t{:?}\t{}\t{}\t{state}",
                    record.kind,
                    record.owner_pid,
                    record.transport.kind,
                    record.transport.address,
                    record.created_at.to_rfc3339(),
                );
            }
        }
    }
    Ok(())
}
