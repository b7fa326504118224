//! Run command implementation

use anyhow::{Context, Result};
use std::ffi::OsString;
use taskns_core::{Error, JobId};
use taskns_namespace::{EngineConfig, MissingPolicy, TaskHost, TaskNamespacePlugin, exec_program};

use crate::cli::RunArgs;

/// Host backed by this process: its environment and the job ID given on
/// the command line
struct ProcessHost {
    job: Option<String>,
}

impl TaskHost for ProcessHost {
    fn job_id(&self) -> taskns_core::Result<JobId> {
        match &self.job {
            Some(id) => JobId::new(id.as_str()),
            None => Err(Error::InvalidConfig {
                message: "Job ID unavailable (use --job or SLURM_JOB_ID)".to_string(),
            }),
        }
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn getenv(&self, name: &str) -> Option<OsString> {
        std::env::var_os(name)
    }

    fn unsetenv(&mut self, name: &str) -> taskns_core::Result<()> {
        // SAFETY: no other thread exists; see the note in main
        unsafe { std::env::remove_var(name) };
        Ok(())
    }
}

pub fn execute(args: RunArgs) -> Result<()> {
    let config = engine_config(&args)?;
    tracing::debug!(?config, "Engine configuration");

    let mut host = ProcessHost { job: args.job };
    let mut plugin = TaskNamespacePlugin::linux(config);

    plugin
        .task_init_privileged(&mut host)
        .context("Failed to prepare job namespaces")?;

    // With detach enabled only the forked child gets past this point
    plugin
        .task_init(&host)
        .context("Failed to enter job namespaces")?;

    let never = exec_program(&args.command)
        .with_context(|| format!("Failed to execute {}", args.command.join(" ")))?;
    match never {}
}

fn engine_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => EngineConfig::new(),
    };

    if args.env {
        config = config.with_environment();
    }
    if let Some(dir) = &args.registry {
        config = config.with_registry(dir);
    }
    if args.best_effort {
        config = config.with_missing(MissingPolicy::BestEffort);
    }
    if args.no_root {
        config = config.with_relocate_root(false);
    }
    if args.no_detach {
        config = config.with_detach(false);
    }

    Ok(config)
}
