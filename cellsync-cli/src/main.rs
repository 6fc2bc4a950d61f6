//! Cellsync — lease reconciliation between a cell and the Topology Service.
//!
//! # Usage
//!
//! ```text
//! cellsync reconcile [--db <path>] [--address <url>] [--cell-id <id>] [--dry-run] [--json | --metrics]
//! cellsync status [--db <path>] [--json]
//! cellsync config show
//! cellsync config init [--force]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, reconcile::ReconcileArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cellsync",
    version,
    about = "Reconcile this cell's outstanding leases with the Topology Service",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass and print its counters.
    Reconcile(ReconcileArgs),

    /// Show local outstanding leases and how fresh they are.
    Status(StatusArgs),

    /// Inspect or create ~/.cellsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
