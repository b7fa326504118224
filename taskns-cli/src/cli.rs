//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "taskns")]
#[command(about = "Join a scheduler job's Linux namespaces and run a program", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program inside the job's namespaces
    Run(RunArgs),

    /// Show namespace information
    Inspect {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<i32>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Job ID
    #[arg(short, long, env = "SLURM_JOB_ID")]
    pub job: Option<String>,

    /// Namespace registry base directory
    #[arg(long, conflicts_with = "env")]
    pub registry: Option<PathBuf>,

    /// Take namespace paths from SLURM_NS_* variables
    #[arg(long)]
    pub env: bool,

    /// Skip registry entries that do not exist
    #[arg(long)]
    pub best_effort: bool,

    /// Keep the current root directory
    #[arg(long)]
    pub no_root: bool,

    /// Exec in place instead of forking a child
    #[arg(long)]
    pub no_detach: bool,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Program to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
