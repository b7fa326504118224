//! Namespace handle resolution
//!
//! Two strategies produce a [`JobNamespaceSet`]:
//! - directory: `<base>/<job>/root` and `<base>/<job>/ns/<kind>`
//! - environment: one `SLURM_NS_<KIND>` variable per kind holding a path

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use taskns_core::{Error, JobId, NamespaceKind, Result};

use crate::config::{EngineConfig, HandleSource, MissingPolicy};
use crate::handle::{JobNamespaceSet, NamespaceHandle, RootHandle};

/// Registry entry holding the job's root directory
pub const ROOT_ENTRY: &str = "root";

/// Registry sub-directory holding namespace references
pub const NS_DIR: &str = "ns";

/// Read access to the variables the environment strategy consumes
pub trait EnvSource {
    /// Value of `name`, if set
    fn var(&self, name: &str) -> Option<OsString>;
}

/// The calling process's environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<OsString> {
        std::env::var_os(name)
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<OsString>,
{
    fn var(&self, name: &str) -> Option<OsString> {
        self(name)
    }
}

/// Resolves the handles for one job under a configuration
#[derive(Debug)]
pub struct Resolver<'a> {
    config: &'a EngineConfig,
}

impl<'a> Resolver<'a> {
    /// Create a resolver for `config`
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Resolve using the configured strategy
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the directory strategy has no job ID or the
    /// path is too long, `Resolution` when a mandatory handle cannot be opened
    pub fn resolve<E: EnvSource + ?Sized>(
        &self,
        job: Option<&JobId>,
        env: &E,
    ) -> Result<JobNamespaceSet> {
        match &self.config.source {
            HandleSource::Directory { base_dir } => {
                let job = job.ok_or_else(|| Error::InvalidConfig {
                    message: "Job ID unavailable".to_string(),
                })?;
                self.from_directory(base_dir, job)
            }
            HandleSource::Environment => self.from_environment(env),
        }
    }

    /// Directory of `job` under `base_dir`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any registry path would reach `PATH_MAX`
    pub fn job_dir(base_dir: &Path, job: &JobId) -> Result<PathBuf> {
        let dir = base_dir.join(job.as_str());
        let path_max = usize::try_from(libc::PATH_MAX).unwrap_or(4096);
        let longest = dir.join(NS_DIR).join("cgroup");
        if longest.as_os_str().len() >= path_max {
            return Err(Error::InvalidConfig {
                message: format!(
                    "Namespace directory for job {job} exceeds {path_max} bytes"
                ),
            });
        }
        Ok(dir)
    }

    /// Resolve from the per-job registry directory
    ///
    /// # Errors
    /// See [`Resolver::resolve`]
    pub fn from_directory(&self, base_dir: &Path, job: &JobId) -> Result<JobNamespaceSet> {
        let dir = Self::job_dir(base_dir, job)?;
        tracing::debug!(dir = %dir.display(), "Checking namespace directory");

        let mut set = JobNamespaceSet::new();

        if self.config.wants_root()
            && let Some(root) = self.open_entry(ROOT_ENTRY, dir.join(ROOT_ENTRY), |p| {
                RootHandle::open(p)
            })?
        {
            set.set_root(root);
        }

        for kind in self.config.effective_kinds().iter() {
            let entry = format!("{NS_DIR}/{}", kind.proc_name());
            let path = dir.join(&entry);
            if let Some(handle) = self.open_entry(&entry, path, |p| NamespaceHandle::open(kind, p))? {
                set.insert(handle);
            }
        }

        tracing::info!(
            job = %job,
            handles = set.open_count(),
            root = set.root().is_some(),
            "Resolved namespace handles"
        );
        Ok(set)
    }

    /// Resolve from `SLURM_NS_*` variables; unset variables are skipped
    ///
    /// # Errors
    /// Returns `Resolution` if a variable names a path that cannot be opened
    pub fn from_environment<E: EnvSource + ?Sized>(&self, env: &E) -> Result<JobNamespaceSet> {
        let mut set = JobNamespaceSet::new();

        for kind in self.config.effective_kinds().iter() {
            let var = kind.env_var();
            let Some(value) = env.var(var).filter(|v| !v.is_empty()) else {
                tracing::debug!(kind = %kind, var, "Variable unset, skipping");
                continue;
            };

            let path = PathBuf::from(value);
            tracing::debug!(kind = %kind, path = %path.display(), "Using namespace from environment");
            let handle = NamespaceHandle::open_lazy(kind, &path).map_err(|source| {
                tracing::error!(var, path = %path.display(), error = %source, "Unable to open namespace path");
                Error::Resolution {
                    entry: var.to_string(),
                    path: path.clone(),
                    source,
                }
            })?;
            set.insert(handle);
        }

        tracing::info!(handles = set.open_count(), "Resolved namespace handles from environment");
        Ok(set)
    }

    fn open_entry<T>(
        &self,
        entry: &str,
        path: PathBuf,
        open: impl FnOnce(&Path) -> io::Result<T>,
    ) -> Result<Option<T>> {
        match open(&path) {
            Ok(opened) => {
                tracing::debug!(entry, path = %path.display(), "Opened registry entry");
                Ok(Some(opened))
            }
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    && self.config.missing == MissingPolicy::BestEffort =>
            {
                tracing::debug!(entry, path = %path.display(), "Skipping missing entry");
                Ok(None)
            }
            Err(source) => {
                tracing::error!(entry, path = %path.display(), error = %source, "Unable to open registry entry");
                Err(Error::Resolution {
                    entry: entry.to_string(),
                    path,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Registry with regular files standing in for namespace references
    fn registry(job: &str, kinds: &[NamespaceKind]) -> tempfile::TempDir {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join(job);
        std::fs::create_dir_all(dir.join(NS_DIR)).unwrap();
        std::fs::create_dir(dir.join(ROOT_ENTRY)).unwrap();
        for kind in kinds {
            std::fs::write(dir.join(NS_DIR).join(kind.proc_name()), b"").unwrap();
        }
        base
    }

    fn no_env(_: &str) -> Option<OsString> {
        None
    }

    #[test]
    fn test_directory_all_present() {
        let base = registry("42", &NamespaceKind::ALL);
        let config = EngineConfig::new().with_registry(base.path());
        let job = JobId::new("42").unwrap();

        let set = Resolver::new(&config).resolve(Some(&job), &no_env).unwrap();
        assert!(set.root().is_some());
        for kind in config.effective_kinds().iter() {
            let handle = set.get(kind).unwrap();
            assert!(handle.snapshot().is_some());
        }
    }

    #[test]
    fn test_strict_missing_pid_is_fatal() {
        let kinds: Vec<_> = NamespaceKind::ALL
            .into_iter()
            .filter(|k| *k != NamespaceKind::Pid)
            .collect();
        let base = registry("42", &kinds);
        let config = EngineConfig::new()
            .with_registry(base.path())
            .with_missing(MissingPolicy::Strict);
        let job = JobId::new("42").unwrap();

        let err = Resolver::new(&config)
            .resolve(Some(&job), &no_env)
            .unwrap_err();
        match err {
            Error::Resolution { entry, .. } => assert_eq!(entry, "ns/pid"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_best_effort_missing_pid_is_skipped() {
        let kinds: Vec<_> = NamespaceKind::ALL
            .into_iter()
            .filter(|k| *k != NamespaceKind::Pid)
            .collect();
        let base = registry("42", &kinds);
        let config = EngineConfig::new()
            .with_registry(base.path())
            .with_missing(MissingPolicy::BestEffort);
        let job = JobId::new("42").unwrap();

        let set = Resolver::new(&config).resolve(Some(&job), &no_env).unwrap();
        assert!(set.get(NamespaceKind::Pid).is_none());
        assert!(set.get(NamespaceKind::Mount).is_some());
    }

    #[test]
    fn test_missing_job_directory_strict() {
        let base = tempfile::tempdir().unwrap();
        let config = EngineConfig::new().with_registry(base.path());
        let job = JobId::new("7").unwrap();

        let err = Resolver::new(&config)
            .resolve(Some(&job), &no_env)
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { ref entry, .. } if entry == ROOT_ENTRY));
    }

    #[test]
    fn test_root_skipped_when_relocation_disabled() {
        let base = registry("42", &NamespaceKind::ALL);
        std::fs::remove_dir(base.path().join("42").join(ROOT_ENTRY)).unwrap();
        let config = EngineConfig::new()
            .with_registry(base.path())
            .with_relocate_root(false);
        let job = JobId::new("42").unwrap();

        let set = Resolver::new(&config).resolve(Some(&job), &no_env).unwrap();
        assert!(set.root().is_none());
    }

    #[test]
    fn test_directory_requires_job_id() {
        let config = EngineConfig::new();
        let err = Resolver::new(&config).resolve(None, &no_env).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_path_too_long() {
        let base = PathBuf::from("/").join("x".repeat(4100));
        let job = JobId::new("1").unwrap();
        assert!(matches!(
            Resolver::job_dir(&base, &job),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_environment_skips_unset_net() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = HashMap::new();
        for kind in [NamespaceKind::Ipc, NamespaceKind::Uts] {
            let path = dir.path().join(kind.proc_name());
            std::fs::write(&path, b"").unwrap();
            vars.insert(kind.env_var(), path.into_os_string());
        }
        let env = |name: &str| vars.get(name).cloned();
        let config = EngineConfig::new().with_environment();

        let set = Resolver::new(&config).resolve(None, &env).unwrap();
        assert!(set.get(NamespaceKind::Network).is_none());
        assert!(set.get(NamespaceKind::Ipc).unwrap().snapshot().is_none());
        assert!(set.get(NamespaceKind::Uts).is_some());
        assert!(set.root().is_none());
    }

    #[test]
    fn test_environment_bad_path_is_fatal() {
        let env = |name: &str| {
            (name == "SLURM_NS_NET").then(|| OsString::from("/nonexistent/taskns/net"))
        };
        let config = EngineConfig::new()
            .with_environment()
            .with_missing(MissingPolicy::BestEffort);

        let err = Resolver::new(&config).resolve(None, &env).unwrap_err();
        assert!(matches!(err, Error::Resolution { ref entry, .. } if entry == "SLURM_NS_NET"));
    }
}
