//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskns_core::{Error, NamespaceKind, Result};

/// Default namespace registry base directory
pub const DEFAULT_REGISTRY_DIR: &str = "/var/run/slurm-llnl/task_nsenter";

/// What to do when a registry entry for a requested kind does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    /// Every requested entry must exist
    #[default]
    Strict,
    /// Missing entries are skipped and never joined
    BestEffort,
}

/// Where namespace handles come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HandleSource {
    /// Per-job directory `<base_dir>/<job>/{root,ns/<kind>}`
    Directory {
        /// Registry base directory
        #[serde(rename = "base-dir")]
        base_dir: PathBuf,
    },
    /// One `SLURM_NS_<KIND>` variable per kind
    Environment,
}

impl Default for HandleSource {
    fn default() -> Self {
        Self::Directory {
            base_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
        }
    }
}

/// Namespace-join engine configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Handle resolution strategy
    pub source: HandleSource,

    /// Policy for missing registry entries
    pub missing: MissingPolicy,

    /// Kinds to join (narrowed to the supported set)
    pub kinds: KindSet,

    /// Relocate the filesystem root after joining (directory strategy only)
    pub relocate_root: bool,

    /// Restore the saved working directory after relocation
    pub restore_cwd: bool,

    /// Remove the `SLURM_NS_*` variables after consuming them
    pub scrub_env: bool,

    /// Fork after joining and relay job control from the parent
    pub detach: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: HandleSource::default(),
            missing: MissingPolicy::Strict,
            kinds: KindSet::supported(),
            relocate_root: true,
            restore_cwd: true,
            scrub_env: true,
            detach: true,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; absent fields keep defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Use the directory strategy rooted at `base_dir`
    #[must_use]
    pub fn with_registry(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.source = HandleSource::Directory {
            base_dir: base_dir.into(),
        };
        self
    }

    /// Use the environment strategy
    #[must_use]
    pub fn with_environment(mut self) -> Self {
        self.source = HandleSource::Environment;
        self
    }

    /// Set the missing-entry policy
    #[must_use]
    pub fn with_missing(mut self, policy: MissingPolicy) -> Self {
        self.missing = policy;
        self
    }

    /// Set the requested kinds
    #[must_use]
    pub fn with_kinds(mut self, kinds: KindSet) -> Self {
        self.kinds = kinds;
        self
    }

    /// Enable root relocation
    #[must_use]
    pub fn with_relocate_root(mut self, enable: bool) -> Self {
        self.relocate_root = enable;
        self
    }

    /// Enable working directory restoration
    #[must_use]
    pub fn with_restore_cwd(mut self, enable: bool) -> Self {
        self.restore_cwd = enable;
        self
    }

    /// Enable environment scrubbing
    #[must_use]
    pub fn with_scrub_env(mut self, enable: bool) -> Self {
        self.scrub_env = enable;
        self
    }

    /// Enable the fork-and-relay continuation
    #[must_use]
    pub fn with_detach(mut self, enable: bool) -> Self {
        self.detach = enable;
        self
    }

    /// Kinds that will actually be resolved: requested and supported
    #[must_use]
    pub fn effective_kinds(&self) -> KindSet {
        self.kinds & KindSet::supported()
    }

    /// Whether root relocation applies under the active strategy
    #[must_use]
    pub fn wants_root(&self) -> bool {
        self.relocate_root && matches!(self.source, HandleSource::Directory { .. })
    }
}

/// Set of namespace kinds for bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<NamespaceKind>", into = "Vec<NamespaceKind>")]
pub struct KindSet(u32);

impl KindSet {
    /// No kinds
    pub const NONE: Self = Self(0);

    /// Every kind this build knows about
    pub const ALL: Self = Self(0b0111_1111);

    const fn bit(kind: NamespaceKind) -> u32 {
        1 << kind as u32
    }

    /// Kinds supported by this build
    #[must_use]
    pub const fn supported() -> Self {
        if cfg!(feature = "cgroupns") {
            Self::ALL
        } else {
            Self(Self::ALL.0 & !Self::bit(NamespaceKind::Cgroup))
        }
    }

    /// Set containing a single kind
    #[must_use]
    pub const fn only(kind: NamespaceKind) -> Self {
        Self(Self::bit(kind))
    }

    /// Add a kind
    #[must_use]
    pub const fn with(self, kind: NamespaceKind) -> Self {
        Self(self.0 | Self::bit(kind))
    }

    /// Remove a kind
    #[must_use]
    pub const fn without(self, kind: NamespaceKind) -> Self {
        Self(self.0 & !Self::bit(kind))
    }

    /// Check if kind is set
    #[must_use]
    pub const fn contains(self, kind: NamespaceKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    /// Check whether no kind is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the contained kinds in declaration order
    pub fn iter(self) -> impl Iterator<Item = NamespaceKind> {
        NamespaceKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl std::ops::BitOr for KindSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for KindSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<Vec<NamespaceKind>> for KindSet {
    fn from(kinds: Vec<NamespaceKind>) -> Self {
        kinds.into_iter().fold(Self::NONE, Self::with)
    }
}

impl From<KindSet> for Vec<NamespaceKind> {
    fn from(set: KindSet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<NamespaceKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.missing, MissingPolicy::Strict);
        assert!(config.relocate_root);
        assert!(config.detach);
        assert!(config.wants_root());
        assert_eq!(config.effective_kinds(), KindSet::supported());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new()
            .with_environment()
            .with_missing(MissingPolicy::BestEffort)
            .with_detach(false);

        assert_eq!(config.source, HandleSource::Environment);
        assert_eq!(config.missing, MissingPolicy::BestEffort);
        assert!(!config.detach);
        assert!(!config.wants_root());
    }

    #[test]
    fn test_kind_set_operations() {
        let set = KindSet::only(NamespaceKind::Pid) | KindSet::only(NamespaceKind::Network);

        assert!(set.contains(NamespaceKind::Pid));
        assert!(set.contains(NamespaceKind::Network));
        assert!(!set.contains(NamespaceKind::Mount));
        assert_eq!(set.iter().count(), 2);
        assert!(set.without(NamespaceKind::Pid).without(NamespaceKind::Network).is_empty());
    }

    #[test]
    fn test_supported_kinds() {
        let supported = KindSet::supported();
        for kind in NamespaceKind::ALL {
            if kind == NamespaceKind::Cgroup {
                assert_eq!(supported.contains(kind), cfg!(feature = "cgroupns"));
            } else {
                assert!(supported.contains(kind));
            }
        }
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "source": { "type": "directory", "base-dir": "/run/ns" },
            "missing": "best-effort",
            "kinds": ["user", "mnt", "net"],
            "detach": false
        }"#;

        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.source,
            HandleSource::Directory {
                base_dir: PathBuf::from("/run/ns")
            }
        );
        assert_eq!(config.missing, MissingPolicy::BestEffort);
        assert!(config.kinds.contains(NamespaceKind::Mount));
        assert!(!config.kinds.contains(NamespaceKind::Pid));
        assert!(!config.detach);
        assert!(config.restore_cwd);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskns.json");
        std::fs::write(&path, r#"{ "source": { "type": "environment" } }"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.source, HandleSource::Environment);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }
}
