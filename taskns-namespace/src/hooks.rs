//! Task lifecycle hooks
//!
//! The host scheduler calls, once per task:
//! 1. [`TaskNamespacePlugin::task_init_privileged`] while still privileged,
//!    to open every handle and save the working directory;
//! 2. [`TaskNamespacePlugin::task_init`] after assuming the user's identity,
//!    to join, relocate root, release handles, restore the working
//!    directory and continue as a forked child.
//!
//! Both hooks do nothing for tasks that are not remotely dispatched. Any
//! `Err` means the task must not exec.

use std::ffi::OsString;

use taskns_core::{Error, JobId, NamespaceKind, Result};

use crate::backend::{LinuxBackend, NamespaceBackend};
use crate::config::{EngineConfig, HandleSource};
use crate::executor;
use crate::handle::JobNamespaceSet;
use crate::manager::{EnterReport, NamespaceManager, SavedWorkingDirectory};
use crate::resolver::Resolver;

/// What the hooks need from the host scheduler
pub trait TaskHost {
    /// Identifier of the job the task belongs to
    ///
    /// # Errors
    /// Returns error if the host cannot provide it
    fn job_id(&self) -> Result<JobId>;

    /// Whether the task runs as a remotely dispatched worker
    fn is_remote(&self) -> bool;

    /// Value of a job environment variable
    fn getenv(&self, name: &str) -> Option<OsString>;

    /// Remove a variable from the job environment
    ///
    /// # Errors
    /// Returns error if the host refuses
    fn unsetenv(&mut self, name: &str) -> Result<()>;
}

/// Remove every `SLURM_NS_*` variable from the job environment
///
/// # Errors
/// Returns the first unset failure
pub fn scrub_environment<H: TaskHost + ?Sized>(host: &mut H) -> Result<()> {
    tracing::debug!("Clearing namespace variables");
    for kind in NamespaceKind::ALL {
        host.unsetenv(kind.env_var()).inspect_err(|e| {
            tracing::error!(var = kind.env_var(), error = %e, "Unable to unset variable");
        })?;
    }
    Ok(())
}

/// State carried from the privileged hook to the join hook of one task
#[derive(Debug)]
struct PreparedTask {
    set: JobNamespaceSet,
    cwd: Option<SavedWorkingDirectory>,
}

/// Namespace-join hooks for one task at a time
#[derive(Debug)]
pub struct TaskNamespacePlugin<B: NamespaceBackend = LinuxBackend> {
    config: EngineConfig,
    manager: NamespaceManager<B>,
    prepared: Option<PreparedTask>,
}

impl TaskNamespacePlugin<LinuxBackend> {
    /// Create hooks issuing real syscalls
    #[must_use]
    pub const fn linux(config: EngineConfig) -> Self {
        Self::new(config, LinuxBackend::new())
    }
}

impl<B: NamespaceBackend> TaskNamespacePlugin<B> {
    /// Create hooks over `backend`
    #[must_use]
    pub const fn new(config: EngineConfig, backend: B) -> Self {
        Self {
            config,
            manager: NamespaceManager::new(backend),
            prepared: None,
        }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the manager
    #[must_use]
    pub const fn manager(&self) -> &NamespaceManager<B> {
        &self.manager
    }

    /// Whether handles are held for a pending [`Self::task_init`]
    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Open the job's handles while privileged
    ///
    /// # Errors
    /// Returns configuration, resolution or environment errors; no handle
    /// stays open on failure
    pub fn task_init_privileged<H: TaskHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if !host.is_remote() {
            tracing::debug!("Local task, skipping namespace preparation");
            return Ok(());
        }

        if let Some(mut stale) = self.prepared.take() {
            tracing::warn!(handles = stale.set.close_all(), "Discarded handles of a previous task");
        }

        let job = match self.config.source {
            HandleSource::Directory { .. } => Some(host.job_id().inspect_err(|e| {
                tracing::error!(error = %e, "Unable to get job id");
            })?),
            HandleSource::Environment => host.job_id().ok(),
        };

        let cwd = if self.config.restore_cwd {
            Some(SavedWorkingDirectory::capture()?)
        } else {
            None
        };

        let env = |name: &str| host.getenv(name);
        let set = Resolver::new(&self.config).resolve(job.as_ref(), &env)?;

        if self.config.scrub_env {
            scrub_environment(host)?;
        }

        self.prepared = Some(PreparedTask { set, cwd });
        Ok(())
    }

    /// Join the prepared namespaces and continue as the isolated child
    ///
    /// With `detach` enabled this returns only in the forked child.
    ///
    /// # Errors
    /// Returns `NotInitialized` without a prior successful
    /// [`Self::task_init_privileged`], or the join, root or fork error
    pub fn task_init<H: TaskHost + ?Sized>(&mut self, host: &H) -> Result<Option<EnterReport>> {
        if !host.is_remote() {
            return Ok(None);
        }

        let PreparedTask { set, cwd } = self.prepared.take().ok_or_else(|| {
            tracing::error!("Not initialized");
            Error::NotInitialized
        })?;

        let report = self.manager.enter(set, cwd.as_ref())?;

        if self.config.detach {
            executor::continue_as_child()?;
        }

        Ok(Some(report))
    }
}
