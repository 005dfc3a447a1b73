//! Harbor: run a multi-service app locally with synced source directories.
//!
//! # Usage
//!
//! ```text
//! harbor start [--dir <path>] [--app <name>] [--file <manifest>]
//! harbor check [--dir <path>] [--app <name>] [--file <manifest>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, start::StartArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "harbor",
    version,
    about = "Run an app's services in containers with live source sync",
    long_about = None,
)]
struct Cli {
    /// Emit diagnostic logs (stderr) as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, start and sync every service; stop all of them on the first exit or Ctrl-C.
    Start(StartArgs),

    /// Show what `start` would run without touching the container engine.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    harbor_run::init_tracing(cli.log_json);
    match cli.command {
        Commands::Start(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
