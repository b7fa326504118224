//! Namespace identity inspection and comparison

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use taskns_core::{NamespaceIdentity, NamespaceKind, ProcessId};

use crate::backend::NamespaceBackend;

/// Path of a process's namespace link; `None` means the calling process
#[must_use]
pub fn ns_path(pid: Option<ProcessId>, kind: NamespaceKind) -> PathBuf {
    match pid {
        Some(pid) => PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name())),
        None => PathBuf::from(format!("/proc/self/ns/{}", kind.proc_name())),
    }
}

/// Read the identity of a process's namespace of `kind`
///
/// # Errors
/// Returns the stat failure (no such process, kind unsupported by the kernel)
pub fn read_identity(pid: Option<ProcessId>, kind: NamespaceKind) -> io::Result<NamespaceIdentity> {
    let metadata = std::fs::metadata(ns_path(pid, kind))?;
    Ok(NamespaceIdentity::from_metadata(&metadata))
}

/// Check whether the calling process already belongs to `target`
///
/// An unreadable current identity answers `false`, so the caller joins.
pub fn same_namespace<B: NamespaceBackend + ?Sized>(
    backend: &B,
    kind: NamespaceKind,
    target: NamespaceIdentity,
) -> bool {
    match backend.current_identity(kind) {
        Ok(current) => current == target,
        Err(e) => {
            tracing::debug!(
                kind = %kind,
                error = %e,
                "Unable to read current namespace identity, will join"
            );
            false
        }
    }
}

/// Namespace identities of one process
#[derive(Debug, Clone, Default)]
pub struct NamespaceInfo {
    /// Inspected process (`None` for the caller)
    pub pid: Option<ProcessId>,
    /// Identity per readable kind
    pub identities: BTreeMap<NamespaceKind, NamespaceIdentity>,
}

impl NamespaceInfo {
    /// Identities of the calling process
    #[must_use]
    pub fn current() -> Self {
        Self::collect(None)
    }

    /// Identities of process `pid`
    ///
    /// # Errors
    /// Returns error if the process has no readable namespace links
    pub fn for_pid(pid: ProcessId) -> io::Result<Self> {
        let info = Self::collect(Some(pid));
        if info.identities.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no readable namespaces for pid {pid}"),
            ));
        }
        Ok(info)
    }

    fn collect(pid: Option<ProcessId>) -> Self {
        let identities = NamespaceKind::ALL
            .into_iter()
            .filter_map(|kind| read_identity(pid, kind).ok().map(|id| (kind, id)))
            .collect();
        Self { pid, identities }
    }

    /// Identity for `kind`, if readable
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<NamespaceIdentity> {
        self.identities.get(&kind).copied()
    }

    /// Kinds in which this process differs from `other`
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<NamespaceKind> {
        self.identities
            .iter()
            .filter(|(kind, id)| other.get(**kind).is_some_and(|o| o != **id))
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Check if in different namespaces than init (PID 1)
    ///
    /// # Errors
    /// Returns error if cannot read PID 1's namespaces
    pub fn is_isolated(&self) -> io::Result<bool> {
        let init = Self::for_pid(ProcessId::from_raw(1))?;
        Ok(!self.differences(&init).is_empty())
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for (kind, identity) in &self.identities {
            writeln!(f, "  {:<7} {kind}:{identity}", kind.proc_name().to_uppercase())?;
        }
        Ok(())
    }
}
