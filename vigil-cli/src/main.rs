//! Vigil CLI: operator interface for the Vigil decision engine.
//!
//! Replays recorded detection batches through the engine and manages the
//! persisted incident ledger between runs.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use vigil_core::{IncidentStatus, Priority};

/// Vigil: threat scoring, incident tracking and resource deployment for monitored sites
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Replay a JSON array of detection batches, one per cycle
    Run {
        /// File holding the batches
        batches: PathBuf,

        /// Historical analytics to use instead of the engine's own hotspots
        #[arg(long)]
        analytics: Option<PathBuf>,

        /// JSON list of resources to register before the first cycle
        #[arg(long)]
        fleet: Option<PathBuf>,

        /// State file (defaults to the user data directory)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Print full cycle reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// List active and archived incidents
    Incidents {
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Show the response plan of an active incident
    Plan {
        id: String,

        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Record a response on an incident, optionally moving its status
    Respond {
        id: String,

        #[arg(long)]
        action: String,

        #[arg(long)]
        responder: String,

        #[arg(long)]
        outcome: String,

        #[arg(long)]
        notes: Option<String>,

        /// NEW, INVESTIGATING or RESPONDING
        #[arg(long)]
        status: Option<IncidentStatus>,

        /// LOW, MEDIUM, HIGH or CRITICAL
        #[arg(long)]
        priority: Option<Priority>,

        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Resolve an incident and archive it
    Resolve {
        id: String,
        details: String,

        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Close an incident without resolution and archive it
    Close {
        id: String,
        reason: String,

        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Print incident statistics as JSON
    Stats {
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "vigil", "vigil")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "vigil.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = vigil_core::config::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    commands::handle_command(cli.command, config, &workspace).await
}
