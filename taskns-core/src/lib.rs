//! Taskns Core - Foundation types and errors
//!
//! This crate provides the core abstractions shared by the namespace-join
//! engine and its command-line front end.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;

pub use error::{Error, JoinFailure, JoinFailures, Result};
pub use types::{JobId, NamespaceIdentity, NamespaceKind, ProcessId};
