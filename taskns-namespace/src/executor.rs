//! Continuation fork and job program execution
//!
//! This module uses `unsafe` for fork() which is inherently unsafe
//! but necessary so the joined process continues as a fresh child
//! (a PID namespace only applies to children of the joiner).

#![allow(unsafe_code)]

use nix::unistd::{ForkResult, execvp, fork};
use std::convert::Infallible;
use std::ffi::CString;
use taskns_core::{Error, ProcessId, Result};

use crate::relay::{self, ChildProcess};

/// Fork and continue as the child; the parent relays job control
///
/// Only the child returns. The parent waits for the child, mirrors its
/// stops, and finally exits with the child's status or dies from the
/// child's terminating signal.
///
/// Must be called while the process is single-threaded.
///
/// # Errors
/// Returns `Fork` if the fork fails; the caller must not exec the job
pub fn continue_as_child() -> Result<()> {
    if !single_threaded() {
        tracing::warn!("Forking from a multi-threaded process");
    }

    // SAFETY: the process is single-threaded; the child only returns into
    // the caller, which execs or exits.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            tracing::debug!(pid = %ProcessId::current(), "Continuing as child");
            Ok(())
        }
        Ok(ForkResult::Parent { child }) => {
            tracing::debug!(child = %child, "Relaying job control for child");
            match relay::relay(&mut ChildProcess::new(child)) {
                Ok(termination) => termination.mirror(),
                Err(e) => {
                    tracing::error!(child = %child, error = %e, "Wait failed");
                    std::process::exit(libc::EXIT_FAILURE)
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Fork failed");
            Err(Error::Fork(e))
        }
    }
}

fn single_threaded() -> bool {
    std::fs::read_dir("/proc/self/task").map_or(true, |tasks| tasks.count() == 1)
}

/// Replace the process image with `command`
///
/// Returns only on failure.
///
/// # Errors
/// Returns `InvalidConfig` for an empty command or interior NUL bytes,
/// `System` if `execvp(3)` fails
pub fn exec_program(command: &[String]) -> Result<Infallible> {
    let (program, _) = command.split_first().ok_or_else(|| Error::InvalidConfig {
        message: "Command cannot be empty".to_string(),
    })?;

    let args: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::InvalidConfig {
            message: format!("Invalid argument: {e}"),
        })?;

    tracing::debug!(program = %program, args = ?&command[1..], "Executing");

    // The first element of `args` is the program itself
    let err = match execvp(&args[0], &args) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    tracing::error!(program = %program, error = %err, "Failed to execute");
    Err(Error::System(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_empty_command() {
        assert!(matches!(
            exec_program(&[]),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_exec_rejects_nul() {
        let cmd = vec!["/bin/echo".to_string(), "a\0b".to_string()];
        assert!(matches!(
            exec_program(&cmd),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
