//! runtrack: command-line host for the running session tracking engine.
//!
//! ## Subcommands
//!
//! - `replay`: feed a recorded sensor trace through a live session and print
//!   a JSON summary on stdout
//! - `check-config`: load the tracker config and print the effective values

mod api_client;
mod local_store;
mod logging;
mod replay;

use api_client::HttpRemoteStore;
use clap::{Parser, Subcommand};
use local_store::LocalStore;
use runtrack_engine::{load_config, RemoteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "runtrack")]
#[command(about = "Running session tracker")]
#[command(version)]
struct Cli {
    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines sensor trace through a tracking session
    Replay {
        /// Trace file, one tagged event per line
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Store the session in this directory instead of the remote backend
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Config file (defaults to ~/.runtrack/config.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Submit the completion without a route image if capture fails
        #[arg(long)]
        complete_without_artifact: bool,
    },

    /// Validate the tracker config and print the effective values
    CheckConfig {
        /// Config file (defaults to ~/.runtrack/config.toml)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_dir.as_deref());

    let result = match cli.command {
        Commands::Replay {
            trace,
            out,
            config,
            complete_without_artifact,
        } => run_replay(trace, out, config, complete_without_artifact),
        Commands::CheckConfig { path } => check_config(path),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "runtrack failed");
        std::process::exit(1);
    }
}

fn run_replay(
    trace: PathBuf,
    out: Option<PathBuf>,
    config_path: Option<PathBuf>,
    complete_without_artifact: bool,
) -> Result<(), String> {
    let config = load_config(config_path)?;
    let store: Arc<dyn RemoteStore> = match out {
        Some(dir) => {
            info!(dir = %dir.display(), "Using local store");
            Arc::new(LocalStore::new(dir))
        }
        None => {
            info!(base_url = %config.remote.base_url, "Using remote backend");
            Arc::new(HttpRemoteStore::new(&config.remote))
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    let options = replay::ReplayOptions {
        trace_path: trace,
        complete_without_artifact,
    };
    let summary = runtime
        .block_on(replay::run(options, config, store))
        .map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| format!("Failed to serialize summary: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn check_config(path: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(path)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    println!("{}", json);
    info!("Config is valid");
    Ok(())
}
