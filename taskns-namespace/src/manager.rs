//! Namespace join orchestration and root relocation

use std::path::{Path, PathBuf};

use taskns_core::{Error, JoinFailures, NamespaceKind, Result};

use crate::backend::{LinuxBackend, NamespaceBackend};
use crate::config::KindSet;
use crate::handle::{JobNamespaceSet, NamespaceHandle, RootHandle};
use crate::identity::same_namespace;

/// Order in which namespaces are joined
///
/// User first (it usually fails until the others are joined, see
/// [`NamespaceManager::join`]), mount last so that later path lookups
/// resolve in the joined mount namespace.
pub const JOIN_ORDER: [NamespaceKind; 7] = [
    NamespaceKind::User,
    NamespaceKind::Cgroup,
    NamespaceKind::Ipc,
    NamespaceKind::Uts,
    NamespaceKind::Network,
    NamespaceKind::Pid,
    NamespaceKind::Mount,
];

/// [`JOIN_ORDER`] restricted to the kinds this build supports
pub fn join_order() -> impl Iterator<Item = NamespaceKind> {
    JOIN_ORDER
        .into_iter()
        .filter(|kind| KindSet::supported().contains(*kind))
}

/// How a single kind ended up joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// `setns(2)` succeeded
    Joined,
    /// Already a member; no syscall issued
    AlreadyMember,
    /// First attempt failed, the deferred retry succeeded (user namespace)
    Retried,
}

/// Per-kind outcomes of a successful join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    outcomes: Vec<(NamespaceKind, JoinOutcome)>,
}

impl JoinReport {
    fn record(&mut self, kind: NamespaceKind, outcome: JoinOutcome) {
        self.outcomes.push((kind, outcome));
    }

    /// Outcome for `kind`; `None` if no handle was provided
    #[must_use]
    pub fn outcome(&self, kind: NamespaceKind) -> Option<JoinOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| *outcome)
    }

    /// Kinds that required a `setns(2)`
    #[must_use]
    pub fn joined(&self) -> Vec<NamespaceKind> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome != JoinOutcome::AlreadyMember)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// All recorded outcomes, in completion order
    #[must_use]
    pub fn outcomes(&self) -> &[(NamespaceKind, JoinOutcome)] {
        &self.outcomes
    }
}

/// Result of root relocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOutcome {
    /// `fchdir` + `chroot(".")` succeeded
    Relocated,
    /// Already rooted at the target; no syscall issued
    AlreadyRooted,
}

/// Working directory captured before any namespace mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedWorkingDirectory(PathBuf);

impl SavedWorkingDirectory {
    /// Capture the current working directory
    ///
    /// # Errors
    /// Returns error if `getcwd(3)` fails
    pub fn capture() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| {
            tracing::error!(error = %e, "Unable to get current working directory");
            Error::Io(e)
        })?;
        Ok(Self(cwd))
    }

    /// Wrap an explicit path
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Saved path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Everything [`NamespaceManager::enter`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterReport {
    /// Join outcomes
    pub join: JoinReport,
    /// Root outcome; `None` when no root handle was provided
    pub root: Option<RootOutcome>,
    /// Descriptors released by the closer
    pub closed: usize,
    /// Whether the saved working directory was restored
    pub cwd_restored: bool,
}

/// Joins prepared namespaces into the calling process
#[derive(Debug)]
pub struct NamespaceManager<B: NamespaceBackend = LinuxBackend> {
    backend: B,
}

impl NamespaceManager<LinuxBackend> {
    /// Create a manager issuing real syscalls
    #[must_use]
    pub const fn linux() -> Self {
        Self::new(LinuxBackend::new())
    }
}

impl<B: NamespaceBackend> NamespaceManager<B> {
    /// Create a new namespace manager
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get the backend
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Join every namespace in `set` in [`JOIN_ORDER`]
    ///
    /// Kinds already joined are skipped without a syscall. A failed user
    /// namespace join is not fatal on the first attempt: it is retried once
    /// after all other kinds, since joining them can grant the capabilities
    /// the user join needs. Failures of other kinds are collected; nothing is
    /// rolled back.
    ///
    /// # Errors
    /// Returns `NotInitialized` for a closed set, `Join` listing every kind
    /// that remained unjoined
    pub fn join(&self, set: &JobNamespaceSet) -> Result<JoinReport> {
        if !set.is_initialized() {
            tracing::error!("Namespace set not initialized");
            return Err(Error::NotInitialized);
        }

        let mut report = JoinReport::default();
        let mut failures = JoinFailures::new();
        let mut user_deferred = false;

        for kind in join_order() {
            let Some(handle) = set.get(kind) else {
                continue;
            };

            match self.join_one(handle) {
                Ok(outcome) => report.record(kind, outcome),
                Err(errno) if kind == NamespaceKind::User => {
                    tracing::debug!(errno = %errno, "User namespace join deferred");
                    user_deferred = true;
                }
                Err(errno) => {
                    tracing::error!(kind = %kind, errno = %errno, "Unable to set namespace");
                    failures.push(kind, errno);
                }
            }
        }

        if user_deferred && let Some(handle) = set.get(NamespaceKind::User) {
            match self.join_one(handle) {
                Ok(JoinOutcome::Joined) => report.record(NamespaceKind::User, JoinOutcome::Retried),
                Ok(outcome) => report.record(NamespaceKind::User, outcome),
                Err(errno) => {
                    tracing::error!(errno = %errno, "Unable to set user namespace on retry");
                    failures.push(NamespaceKind::User, errno);
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::Join { failures });
        }

        tracing::info!(joined = ?report.joined(), "Namespaces joined");
        Ok(report)
    }

    fn join_one(&self, handle: &NamespaceHandle) -> nix::Result<JoinOutcome> {
        let kind = handle.kind();

        match handle.identity() {
            Ok(target) if same_namespace(&self.backend, kind, target) => {
                tracing::debug!(kind = %kind, identity = %target, "Already in same namespace");
                return Ok(JoinOutcome::AlreadyMember);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(kind = %kind, error = %e, "Unable to stat namespace handle, will join");
            }
        }

        tracing::debug!(
            kind = %kind,
            fd = handle.raw_fd(),
            path = %handle.path().display(),
            "Using namespace"
        );
        self.backend.setns(handle)?;
        Ok(JoinOutcome::Joined)
    }

    /// Make `root` the process root
    ///
    /// No-op when `/` already is `root`. Must only run after [`Self::join`]
    /// succeeded, so that the handle is interpreted in the joined mount
    /// namespace.
    ///
    /// # Errors
    /// Returns `Root` naming the step that failed
    pub fn relocate_root(&self, root: &RootHandle) -> Result<RootOutcome> {
        let target = root.identity();
        match self.backend.root_identity() {
            Ok(current) if current == target => {
                tracing::debug!(identity = %target, "Already using same root");
                return Ok(RootOutcome::AlreadyRooted);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Unable to stat current root, will relocate"),
        }

        self.backend.fchdir(root).map_err(|source| {
            tracing::error!(error = %source, "Unable to change directories to new root dir");
            Error::Root {
                step: "fchdir",
                source,
            }
        })?;
        tracing::debug!(path = %root.path().display(), "Changed directory to new root directory");

        self.backend.chroot_cwd().map_err(|source| {
            tracing::error!(error = %source, "Unable to change root");
            Error::Root {
                step: "chroot",
                source,
            }
        })?;
        tracing::info!(path = %root.path().display(), "Changed root");

        Ok(RootOutcome::Relocated)
    }

    /// Change back to the saved working directory
    ///
    /// # Errors
    /// Returns `Restore`; callers treat it as non-fatal
    pub fn restore_cwd(&self, saved: &SavedWorkingDirectory) -> Result<()> {
        self.backend
            .chdir(saved.path())
            .map_err(|source| Error::Restore {
                path: saved.path().to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %saved.path().display(), "Changed working directory");
        Ok(())
    }

    /// Join, relocate root, release every handle, then restore `cwd`
    ///
    /// `set` is consumed and closed on every path. A restore failure is
    /// logged and leaves the process at the new root's top-level directory.
    ///
    /// # Errors
    /// Returns the join or root error; the caller must not exec the job
    pub fn enter(
        &self,
        mut set: JobNamespaceSet,
        cwd: Option<&SavedWorkingDirectory>,
    ) -> Result<EnterReport> {
        let outcome = self.join(&set).and_then(|join| {
            let root = set.root().map(|root| self.relocate_root(root)).transpose()?;
            Ok((join, root))
        });

        let closed = set.close_all();
        let (join, root) = outcome?;

        let cwd_restored = match cwd {
            Some(saved) => match self.restore_cwd(saved) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Continuing in new root directory");
                    false
                }
            },
            None => false,
        };

        Ok(EnterReport {
            join,
            root,
            closed,
            cwd_restored,
        })
    }
}
