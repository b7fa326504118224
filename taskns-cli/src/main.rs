//! taskns: run a program inside a scheduler job's namespaces
//!
//! The process stays single-threaded from start to exec: joining user and
//! mount namespaces is refused to multi-threaded callers.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::Cli;

/// Environment variable holding the log filter directives
const LOG_ENV: &str = "TASKNS_LOG";

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity; TASKNS_LOG wins when set
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Execute the command
    if let Err(e) = commands::dispatch(cli.command) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
