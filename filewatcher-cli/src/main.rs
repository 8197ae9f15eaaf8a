//! Filewatcher — pick up files from a watch directory and hand them off.
//!
//! # Usage
//!
//! ```text
//! filewatcher run [--watch-dir exchange] [--desired desired.yaml] [--send-timeout-ms 30000]
//! filewatcher status
//! filewatcher stop
//! filewatcher configure [--interval <ms>] [--search-pattern <glob>] [--rename-extension <suffix>] [--reset <key>]...
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{configure::ConfigureArgs, daemon::RunArgs};
use filewatcher_daemon::paths::default_state_dir;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "filewatcher",
    version,
    about = "Report files dropped into a watch directory and mark them as processed",
    long_about = None,
)]
struct Cli {
    /// Directory holding the control socket and outbox files.
    #[arg(long, global = true, env = "FILEWATCHER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watcher in the foreground until stopped.
    Run(RunArgs),

    /// Show the running watcher's configuration and last tick.
    Status,

    /// Ask the running watcher to shut down.
    Stop,

    /// Push a desired-state update to the running watcher.
    Configure(ConfigureArgs),
}

impl Cli {
    fn resolve_state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                Ok(default_state_dir(&home))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_dir = cli.resolve_state_dir()?;
    match cli.command {
        Commands::Run(args) => args.run(&state_dir),
        Commands::Status => commands::daemon::status(&state_dir),
        Commands::Stop => commands::daemon::stop(&state_dir),
        Commands::Configure(args) => args.run(&state_dir),
    }
}
