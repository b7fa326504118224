//! Kernel backend trait for pluggable implementations

use nix::errno::Errno;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use taskns_core::{NamespaceIdentity, NamespaceKind};

use crate::handle::{NamespaceHandle, RootHandle};
use crate::identity;

/// Trait for the privileged kernel operations the engine performs
///
/// This allows for different implementations:
/// - [`LinuxBackend`] - Production syscalls
/// - [`MockBackend`] - Testing without privileges
pub trait NamespaceBackend {
    /// Identity of the caller's current namespace of `kind`
    ///
    /// # Errors
    /// Returns error if `/proc/self/ns/<kind>` cannot be read
    fn current_identity(&self, kind: NamespaceKind) -> io::Result<NamespaceIdentity>;

    /// Identity of the caller's current root directory
    ///
    /// # Errors
    /// Returns error if `/` cannot be stat'ed
    fn root_identity(&self) -> io::Result<NamespaceIdentity>;

    /// Join the namespace referenced by `handle`
    ///
    /// # Errors
    /// Returns the `setns(2)` errno
    fn setns(&self, handle: &NamespaceHandle) -> nix::Result<()>;

    /// Change the working directory to the root handle
    ///
    /// # Errors
    /// Returns the `fchdir(2)` errno
    fn fchdir(&self, root: &RootHandle) -> nix::Result<()>;

    /// Make the working directory the process root
    ///
    /// # Errors
    /// Returns the `chroot(2)` errno
    fn chroot_cwd(&self) -> nix::Result<()>;

    /// Change the working directory by path
    ///
    /// # Errors
    /// Returns the `chdir(2)` failure
    fn chdir(&self, path: &Path) -> io::Result<()>;
}

/// Backend issuing real syscalls
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    /// Create a new Linux backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NamespaceBackend for LinuxBackend {
    fn current_identity(&self, kind: NamespaceKind) -> io::Result<NamespaceIdentity> {
        identity::read_identity(None, kind)
    }

    fn root_identity(&self) -> io::Result<NamespaceIdentity> {
        Ok(NamespaceIdentity::from_metadata(&std::fs::metadata("/")?))
    }

    fn setns(&self, handle: &NamespaceHandle) -> nix::Result<()> {
        nix::sched::setns(handle.as_fd(), handle.kind().clone_flag())
    }

    fn fchdir(&self, root: &RootHandle) -> nix::Result<()> {
        // SAFETY: the descriptor is owned by `root` and open for the whole call
        let res = unsafe { libc::fchdir(root.as_fd().as_raw_fd()) };
        Errno::result(res).map(drop)
    }

    fn chroot_cwd(&self) -> nix::Result<()> {
        nix::unistd::chroot(".")
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        std::env::set_current_dir(path)
    }
}

/// Kernel operation recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `setns(2)` for a kind
    Setns(NamespaceKind),
    /// `fchdir(2)` to the root handle
    Fchdir,
    /// `chroot(".")`
    Chroot,
    /// `chdir(2)` to a path
    Chdir(PathBuf),
}

/// Mock backend for testing (doesn't touch the kernel)
///
/// A successful `setns` makes the handle's identity the current one, and a
/// successful `fchdir` + `chroot` makes the root handle's identity the
/// current root, so repeated runs observe their own effects.
///
/// # Example
/// ```
/// use taskns_namespace::{MockBackend, NamespaceBackend};
/// use taskns_core::{NamespaceIdentity, NamespaceKind};
///
/// let backend = MockBackend::new();
/// backend.set_current(NamespaceKind::Pid, NamespaceIdentity::new(4, 1));
///
/// let id = backend.current_identity(NamespaceKind::Pid).unwrap();
/// assert_eq!(id.ino, 1);
/// assert!(backend.calls().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

#[derive(Default)]
struct MockState {
    current: HashMap<NamespaceKind, NamespaceIdentity>,
    root: Option<NamespaceIdentity>,
    cwd_target: Option<NamespaceIdentity>,
    setns_failures: HashMap<NamespaceKind, VecDeque<Errno>>,
    fchdir_failure: Option<Errno>,
    chroot_failure: Option<Errno>,
    chdir_failure: Option<io::ErrorKind>,
    calls: Vec<Call>,
}

impl MockBackend {
    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the caller's current identity for `kind`
    pub fn set_current(&self, kind: NamespaceKind, identity: NamespaceIdentity) {
        self.state.borrow_mut().current.insert(kind, identity);
    }

    /// Set the caller's current root identity
    pub fn set_root(&self, identity: NamespaceIdentity) {
        self.state.borrow_mut().root = Some(identity);
    }

    /// Make the next `setns` for `kind` fail with `errno`; stacks per call
    pub fn fail_setns(&self, kind: NamespaceKind, errno: Errno) {
        self.state
            .borrow_mut()
            .setns_failures
            .entry(kind)
            .or_default()
            .push_back(errno);
    }

    /// Make every `fchdir` fail with `errno`
    pub fn fail_fchdir(&self, errno: Errno) {
        self.state.borrow_mut().fchdir_failure = Some(errno);
    }

    /// Make every `chroot` fail with `errno`
    pub fn fail_chroot(&self, errno: Errno) {
        self.state.borrow_mut().chroot_failure = Some(errno);
    }

    /// Make every `chdir` fail with `kind`
    pub fn fail_chdir(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().chdir_failure = Some(kind);
    }

    /// Current identity for `kind` as the mock sees it
    #[must_use]
    pub fn current(&self, kind: NamespaceKind) -> Option<NamespaceIdentity> {
        self.state.borrow().current.get(&kind).copied()
    }

    /// Current root identity as the mock sees it
    #[must_use]
    pub fn root(&self) -> Option<NamespaceIdentity> {
        self.state.borrow().root
    }

    /// Every recorded kernel operation, in order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Kinds passed to `setns`, in order
    #[must_use]
    pub fn setns_calls(&self) -> Vec<NamespaceKind> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Setns(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl NamespaceBackend for MockBackend {
    fn current_identity(&self, kind: NamespaceKind) -> io::Result<NamespaceIdentity> {
        self.current(kind)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn root_identity(&self) -> io::Result<NamespaceIdentity> {
        self.root()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn setns(&self, handle: &NamespaceHandle) -> nix::Result<()> {
        let kind = handle.kind();
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Setns(kind));

        if let Some(errno) = state
            .setns_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            tracing::debug!(kind = %kind, errno = %errno, "Mock: setns failed");
            return Err(errno);
        }

        let target = handle.identity().map_err(|_| Errno::EBADF)?;
        state.current.insert(kind, target);
        tracing::debug!(kind = %kind, "Mock: joined namespace");
        Ok(())
    }

    fn fchdir(&self, root: &RootHandle) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Fchdir);
        if let Some(errno) = state.fchdir_failure {
            return Err(errno);
        }
        state.cwd_target = Some(root.identity());
        Ok(())
    }

    fn chroot_cwd(&self) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Chroot);
        if let Some(errno) = state.chroot_failure {
            return Err(errno);
        }
        state.root = state.cwd_target;
        Ok(())
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Chdir(path.to_path_buf()));
        match state.chdir_failure {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }
}
