//! Open namespace and root handles owned by a single task setup

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use taskns_core::{NamespaceIdentity, NamespaceKind};

/// Open reference to a kernel namespace
///
/// The descriptor is owned; dropping the handle closes it.
#[derive(Debug)]
pub struct NamespaceHandle {
    kind: NamespaceKind,
    path: PathBuf,
    file: File,
    identity: Option<NamespaceIdentity>,
}

impl NamespaceHandle {
    /// Open `path` and snapshot its identity
    ///
    /// # Errors
    /// Returns the open or stat failure
    pub fn open(kind: NamespaceKind, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let identity = NamespaceIdentity::from_metadata(&file.metadata()?);
        Ok(Self {
            kind,
            path,
            file,
            identity: Some(identity),
        })
    }

    /// Open `path` without capturing an identity; it is computed at join time
    ///
    /// # Errors
    /// Returns the open failure
    pub fn open_lazy(kind: NamespaceKind, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            kind,
            path,
            file,
            identity: None,
        })
    }

    /// Namespace kind
    #[must_use]
    pub const fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Path the handle was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw descriptor number (for diagnostics)
    #[must_use]
    pub fn raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    /// Identity captured at resolution, if any
    #[must_use]
    pub const fn snapshot(&self) -> Option<NamespaceIdentity> {
        self.identity
    }

    /// Identity of the target namespace
    ///
    /// Uses the resolution-time snapshot when present, otherwise stats the
    /// open descriptor.
    ///
    /// # Errors
    /// Returns the fstat failure
    pub fn identity(&self) -> io::Result<NamespaceIdentity> {
        match self.identity {
            Some(identity) => Ok(identity),
            None => Ok(NamespaceIdentity::from_metadata(&self.file.metadata()?)),
        }
    }
}

impl AsFd for NamespaceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Open reference to the directory a job should be rooted at
#[derive(Debug)]
pub struct RootHandle {
    path: PathBuf,
    dir: File,
    identity: NamespaceIdentity,
}

impl RootHandle {
    /// Open the directory at `path` and snapshot its identity
    ///
    /// # Errors
    /// Returns the open or stat failure
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let dir = File::open(&path)?;
        let metadata = dir.metadata()?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                "root entry is not a directory",
            ));
        }
        Ok(Self {
            path,
            dir,
            identity: NamespaceIdentity::from_metadata(&metadata),
        })
    }

    /// Path the handle was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the target root directory
    #[must_use]
    pub const fn identity(&self) -> NamespaceIdentity {
        self.identity
    }
}

impl AsFd for RootHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.dir.as_fd()
    }
}

/// Every handle resolved for one job
///
/// Created by the resolver, consumed by the manager, released by
/// [`JobNamespaceSet::close_all`] (or on drop).
#[derive(Debug, Default)]
pub struct JobNamespaceSet {
    handles: BTreeMap<NamespaceKind, NamespaceHandle>,
    root: Option<RootHandle>,
    initialized: bool,
}

impl JobNamespaceSet {
    /// Create an empty, initialized set
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: BTreeMap::new(),
            root: None,
            initialized: true,
        }
    }

    /// Add a namespace handle, replacing (and closing) any previous one of the same kind
    pub fn insert(&mut self, handle: NamespaceHandle) {
        self.handles.insert(handle.kind(), handle);
    }

    /// Set the root handle
    pub fn set_root(&mut self, root: RootHandle) {
        self.root = Some(root);
    }

    /// Handle for `kind`, if one was provided
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<&NamespaceHandle> {
        self.handles.get(&kind)
    }

    /// Root handle, if one was provided
    #[must_use]
    pub const fn root(&self) -> Option<&RootHandle> {
        self.root.as_ref()
    }

    /// Kinds that have a handle
    pub fn kinds(&self) -> impl Iterator<Item = NamespaceKind> + '_ {
        self.handles.keys().copied()
    }

    /// Number of open descriptors held (namespaces plus root)
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.handles.len() + usize::from(self.root.is_some())
    }

    /// Whether the set still holds its handles
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Release every descriptor and mark the set uninitialized
    ///
    /// Returns the number of descriptors closed; a second call closes none.
    pub fn close_all(&mut self) -> usize {
        let closed = self.open_count();
        tracing::debug!(closed, "Closing namespace handles");
        self.handles.clear();
        self.root = None;
        self.initialized = false;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_identity_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc");
        std::fs::write(&path, b"").unwrap();

        let eager = NamespaceHandle::open(NamespaceKind::Ipc, &path).unwrap();
        let lazy = NamespaceHandle::open_lazy(NamespaceKind::Ipc, &path).unwrap();

        assert!(eager.snapshot().is_some());
        assert!(lazy.snapshot().is_none());
        assert_eq!(eager.identity().unwrap(), lazy.identity().unwrap());
    }

    #[test]
    fn test_root_handle_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root");
        std::fs::write(&path, b"").unwrap();

        assert!(RootHandle::open(&path).is_err());
        assert!(RootHandle::open(dir.path()).is_ok());
    }

    #[test]
    fn test_close_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ns = dir.path().join("uts");
        std::fs::write(&ns, b"").unwrap();

        let mut set = JobNamespaceSet::new();
        set.insert(NamespaceHandle::open(NamespaceKind::Uts, &ns).unwrap());
        set.set_root(RootHandle::open(dir.path()).unwrap());

        assert!(set.is_initialized());
        assert_eq!(set.open_count(), 2);
        assert_eq!(set.close_all(), 2);
        assert!(!set.is_initialized());
        assert_eq!(set.close_all(), 0);
        assert!(set.get(NamespaceKind::Uts).is_none());
        assert!(set.root().is_none());
    }
}
