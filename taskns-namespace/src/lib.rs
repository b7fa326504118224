//! Joining a scheduler task into its job's Linux namespaces
//!
//! A job's namespaces are published by reference, either in a per-job
//! registry directory or through `SLURM_NS_*` variables. For every task
//! this crate:
//! - resolves the references into open handles while privileged
//! - joins user, cgroup, IPC, UTS, network, PID and mount namespaces
//! - relocates the process root into the job's root directory
//! - releases every handle before the job program runs
//! - forks so the program starts inside the joined PID namespace, with the
//!   parent mirroring the child's job-control state and exit status

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod executor;
pub mod handle;
pub mod hooks;
pub mod identity;
pub mod manager;
pub mod relay;
pub mod resolver;

pub use backend::{Call, LinuxBackend, MockBackend, NamespaceBackend};
pub use config::{DEFAULT_REGISTRY_DIR, EngineConfig, HandleSource, KindSet, MissingPolicy};
pub use executor::{continue_as_child, exec_program};
pub use handle::{JobNamespaceSet, NamespaceHandle, RootHandle};
pub use hooks::{TaskHost, TaskNamespacePlugin, scrub_environment};
pub use identity::{NamespaceInfo, same_namespace};
pub use manager::{
    EnterReport, JOIN_ORDER, JoinOutcome, JoinReport, NamespaceManager, RootOutcome,
    SavedWorkingDirectory,
};
pub use relay::{Termination, relay};
pub use resolver::{EnvSource, ProcessEnv, Resolver};
