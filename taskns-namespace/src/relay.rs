//! Job-control relay between the continuation parent and its child
//!
//! After the fork in [`crate::executor::continue_as_child`] the parent is
//! the process the scheduler tracks. It mirrors the child's job-control
//! state so that outside observers see a single task:
//!
//! | child event     | parent action                        |
//! |-----------------|--------------------------------------|
//! | stopped(sig)    | stop self, then `SIGCONT` the child  |
//! | continued       | keep waiting                         |
//! | exited(code)    | exit with `code`                     |
//! | killed(sig)     | die from `sig`                       |

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// State change of the child observed through `waitpid(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    /// Child stopped by a job-control signal
    Stopped(Signal),
    /// Child resumed
    Continued,
    /// Child exited normally
    Exited(i32),
    /// Child terminated by a signal
    Killed(Signal),
}

impl ChildEvent {
    /// Decode a wait status; `None` for statuses the relay ignores
    #[must_use]
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Stopped(_, sig) => Some(Self::Stopped(sig)),
            WaitStatus::Continued(_) => Some(Self::Continued),
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(Self::Killed(sig)),
            _ => None,
        }
    }
}

/// How the relay parent must end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exit with the child's status
    Exit(i32),
    /// Die from the child's terminating signal
    Signal(Signal),
}

impl Termination {
    /// Shell-style status (`128 + signal` for signal deaths)
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Exit(code) => code,
            Self::Signal(sig) => 128 + sig as i32,
        }
    }

    /// End the calling process the same way the child ended
    pub fn mirror(self) -> ! {
        match self {
            Self::Exit(code) => std::process::exit(code),
            Self::Signal(sig) => {
                // The runtime ignores SIGPIPE; the default action must apply.
                // SAFETY: no handler is installed, only the default disposition
                if let Err(e) = unsafe { signal::signal(sig, SigHandler::SigDfl) } {
                    tracing::debug!(signal = %sig, error = %e, "Unable to reset signal disposition");
                }
                if let Err(e) = signal::raise(sig) {
                    tracing::error!(signal = %sig, error = %e, "Unable to raise signal");
                }
                std::process::exit(libc::EXIT_FAILURE)
            }
        }
    }
}

/// Process operations the relay needs
pub trait ProcessControl {
    /// Block until the child changes state
    ///
    /// # Errors
    /// Returns the `waitpid(2)` errno
    fn wait_child(&mut self) -> nix::Result<WaitStatus>;

    /// Stop the calling process; returns once it is continued
    ///
    /// # Errors
    /// Returns the `kill(2)` errno
    fn stop_self(&mut self) -> nix::Result<()>;

    /// Send `SIGCONT` to the child
    ///
    /// # Errors
    /// Returns the `kill(2)` errno
    fn resume_child(&mut self) -> nix::Result<()>;
}

/// [`ProcessControl`] for a real forked child
#[derive(Debug, Clone, Copy)]
pub struct ChildProcess {
    child: Pid,
}

impl ChildProcess {
    /// Control `child`
    #[must_use]
    pub const fn new(child: Pid) -> Self {
        Self { child }
    }
}

impl ProcessControl for ChildProcess {
    fn wait_child(&mut self) -> nix::Result<WaitStatus> {
        waitpid(self.child, Some(WaitPidFlag::WUNTRACED))
    }

    fn stop_self(&mut self) -> nix::Result<()> {
        signal::kill(Pid::this(), Signal::SIGSTOP)
    }

    fn resume_child(&mut self) -> nix::Result<()> {
        signal::kill(self.child, Signal::SIGCONT)
    }
}

/// Relay job control until the child terminates
///
/// # Errors
/// Returns a `waitpid(2)` failure other than `EINTR`
pub fn relay<C: ProcessControl + ?Sized>(control: &mut C) -> nix::Result<Termination> {
    loop {
        let status = match control.wait_child() {
            Err(Errno::EINTR) => continue,
            other => other?,
        };

        match ChildEvent::from_wait_status(status) {
            Some(ChildEvent::Stopped(sig)) => {
                tracing::debug!(signal = %sig, "Child stopped, stopping relay");
                if let Err(e) = control.stop_self() {
                    tracing::warn!(error = %e, "Unable to stop relay process");
                }
                if let Err(e) = control.resume_child() {
                    tracing::warn!(error = %e, "Unable to resume child");
                }
            }
            Some(ChildEvent::Continued) | None => {}
            Some(ChildEvent::Exited(code)) => {
                tracing::debug!(code, "Child exited");
                return Ok(Termination::Exit(code));
            }
            Some(ChildEvent::Killed(sig)) => {
                tracing::debug!(signal = %sig, "Child killed");
                return Ok(Termination::Signal(sig));
            }
        }
    }
}
