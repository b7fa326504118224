//! Core type definitions with strong typing and validation

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::str::FromStr;

use crate::{Error, Result};

/// Scheduler job identifier with validation
///
/// The identifier becomes a path component of the namespace registry, so it
/// is restricted to characters that cannot escape the registry directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Maximum length for job IDs
    pub const MAX_LENGTH: usize = 64;

    /// Create a new `JobId` with validation
    ///
    /// # Errors
    /// Returns error if ID is invalid (empty, too long, or contains invalid characters)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Validate a job ID
    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidConfig {
                message: "Job ID cannot be empty".to_string(),
            });
        }

        if id.len() > Self::MAX_LENGTH {
            return Err(Error::InvalidConfig {
                message: format!("Job ID too long (max {} chars)", Self::MAX_LENGTH),
            });
        }

        // `_` covers array jobs (123_4), `+` heterogeneous components (123+0)
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+')
        {
            return Err(Error::InvalidConfig {
                message: "Job ID can only contain alphanumeric, dash, underscore, and plus"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get the job ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl From<u32> for JobId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// Kind of kernel namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Cgroup namespace
    Cgroup,
    /// IPC namespace
    Ipc,
    /// Network namespace
    #[serde(rename = "net", alias = "network")]
    Network,
    /// Mount namespace
    #[serde(rename = "mnt", alias = "mount")]
    Mount,
    /// PID namespace
    Pid,
    /// User namespace
    User,
    /// UTS namespace (hostname)
    Uts,
}

impl NamespaceKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Cgroup,
        Self::Ipc,
        Self::Network,
        Self::Mount,
        Self::Pid,
        Self::User,
        Self::Uts,
    ];

    /// Name used by the kernel under `/proc/<pid>/ns/`
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Network => "net",
            Self::Mount => "mnt",
            Self::Pid => "pid",
            Self::User => "user",
            Self::Uts => "uts",
        }
    }

    /// Environment variable carrying a path to this kind's namespace
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Cgroup => "SLURM_NS_CGROUP",
            Self::Ipc => "SLURM_NS_IPC",
            Self::Network => "SLURM_NS_NET",
            Self::Mount => "SLURM_NS_MNT",
            Self::Pid => "SLURM_NS_PID",
            Self::User => "SLURM_NS_USER",
            Self::Uts => "SLURM_NS_UTS",
        }
    }

    /// Flag passed to `setns(2)` so the kernel rejects a handle of the wrong kind
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

impl FromStr for NamespaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cgroup" => Ok(Self::Cgroup),
            "ipc" => Ok(Self::Ipc),
            "net" | "network" => Ok(Self::Network),
            "mnt" | "mount" => Ok(Self::Mount),
            "pid" => Ok(Self::Pid),
            "user" => Ok(Self::User),
            "uts" => Ok(Self::Uts),
            other => Err(Error::InvalidConfig {
                message: format!("Unknown namespace kind: {other}"),
            }),
        }
    }
}

/// Stable identity of a namespace object or directory
///
/// Two handles refer to the same object iff device and inode both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceIdentity {
    /// Device number
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl NamespaceIdentity {
    /// Create from raw device and inode numbers
    #[must_use]
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of the object described by `metadata`
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

impl fmt::Display for NamespaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_validation() {
        assert!(JobId::new("12345").is_ok());
        assert!(JobId::new("123_4").is_ok());
        assert!(JobId::new("").is_err());
        assert!(JobId::new("1".repeat(65)).is_err());
        assert!(JobId::new("..").is_err());
        assert!(JobId::new("12/34").is_err());
    }

    #[test]
    fn test_job_id_from_numeric() {
        let id = JobId::from(4242u32);
        assert_eq!(id.as_str(), "4242");
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);

        let nix_pid = pid.as_nix_pid();
        assert_eq!(nix_pid.as_raw(), 123);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in NamespaceKind::ALL {
            let parsed: NamespaceKind = kind.proc_name().parse().unwrap();
            assert_eq!(parsed, kind);
            assert!(kind.env_var().starts_with("SLURM_NS_"));
        }
        assert_eq!(
            "network".parse::<NamespaceKind>().unwrap(),
            NamespaceKind::Network
        );
        assert!("time".parse::<NamespaceKind>().is_err());
    }

    #[test]
    fn test_kind_clone_flags_are_distinct() {
        let mut combined = CloneFlags::empty();
        for kind in NamespaceKind::ALL {
            assert!(!combined.contains(kind.clone_flag()));
            combined |= kind.clone_flag();
        }
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(NamespaceIdentity::new(4, 100), NamespaceIdentity::new(4, 100));
        assert_ne!(NamespaceIdentity::new(4, 100), NamespaceIdentity::new(5, 100));
        assert_eq!(NamespaceIdentity::new(4, 100).to_string(), "[100]");
    }
}
