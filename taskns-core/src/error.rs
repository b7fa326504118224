//! Error types for taskns

use std::fmt;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::NamespaceKind;

/// Taskns error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (bad job id, path too long, unreadable config)
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// A mandatory namespace or root handle could not be opened
    #[error("Unable to open {entry} at {}: {source}", path.display())]
    Resolution {
        /// Registry entry or environment variable that named the handle
        entry: String,
        /// Path that was opened
        path: PathBuf,
        /// Underlying open failure
        #[source]
        source: std::io::Error,
    },

    /// One or more namespaces could not be joined
    #[error("Unable to join namespaces: {failures}")]
    Join {
        /// Every kind that failed, with its errno
        failures: JoinFailures,
    },

    /// Root relocation failed part-way
    #[error("Unable to change root ({step}): {source}")]
    Root {
        /// Step that failed (`fchdir` or `chroot`)
        step: &'static str,
        /// Underlying syscall failure
        #[source]
        source: Errno,
    },

    /// Working directory could not be restored after root relocation
    #[error("Unable to change working directory to {}: {source}", path.display())]
    Restore {
        /// Saved working directory
        path: PathBuf,
        /// Underlying chdir failure
        #[source]
        source: std::io::Error,
    },

    /// Join phase invoked without a prepared namespace set
    #[error("Namespace set not initialized")]
    NotInitialized,

    /// Continuation fork failed
    #[error("Fork failed: {0}")]
    Fork(#[source] Errno),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] Errno),
}

/// A single failed namespace join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinFailure {
    /// Kind that could not be joined
    pub kind: NamespaceKind,
    /// errno reported by `setns(2)`
    pub errno: Errno,
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.errno.desc())
    }
}

/// Ordered list of failed joins, in the order they were attempted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinFailures(Vec<JoinFailure>);

impl JoinFailures {
    /// Create an empty list
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a failure
    pub fn push(&mut self, kind: NamespaceKind, errno: Errno) {
        self.0.push(JoinFailure { kind, errno });
    }

    /// Check whether no failures were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded failures
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether `kind` failed
    #[must_use]
    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.0.iter().any(|f| f.kind == kind)
    }

    /// Iterate over the failures
    pub fn iter(&self) -> impl Iterator<Item = &JoinFailure> {
        self.0.iter()
    }
}

impl fmt::Display for JoinFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Result type alias for taskns operations
pub type Result<T> = std::result::Result<T, Error>;
