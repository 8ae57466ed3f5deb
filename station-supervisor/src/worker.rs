//! Worker fork + respawn-with-backoff, grounded on `startupDaemon`/
//! `waitForWorker` in `examples/original_source/src-linux/sys_linux.c`: the
//! daemon forks a worker, polls its liveness with `waitpid(..., WNOHANG)`
//! every 500ms rather than relying on `SIGCHLD` (the original's comment: "we
//! also would like to slow down restart to avoid blocking the system in a
//! tight restart cycle").
//!
//! `fork()` must happen before any multi-threaded runtime exists in the
//! calling process. [`fork_once`] is deliberately synchronous and
//! `unsafe`-delegating for that reason: the worker branch returns to its
//! caller, which then builds a fresh `tokio` runtime of its own and runs the
//! station; the supervisor branch polls with plain blocking calls (no
//! `tokio`), so no runtime ever survives across a `fork()` in this crate.

use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("waitpid failed: {0}")]
    Wait(#[source] nix::Error),
}

pub enum Forked {
    /// This is the new worker process; caller should proceed to run the
    /// station's own async runtime.
    Worker,
    /// This is the supervisor; `child` is the worker's pid.
    Supervisor { child: Pid },
}

/// Fork once. Matches `startupDaemon`'s single `fork()` call per respawn.
pub fn fork_once() -> Result<Forked, Error> {
    match unsafe { unistd::fork() }.map_err(Error::Fork)? {
        ForkResult::Child => Ok(Forked::Worker),
        ForkResult::Parent { child } => Ok(Forked::Supervisor { child }),
    }
}

/// Blocking supervisor loop: fork a worker, wait for it to exit, fork a
/// fresh one, forever. Never returns in the supervisor process — it only
/// stops when this process itself is killed (spec.md §6 "at most one
/// worker process under the daemon at any time").
pub fn supervise_forever() -> Result<(), Error> {
    loop {
        match fork_once()? {
            Forked::Worker => return Ok(()),
            Forked::Supervisor { child } => {
                tracing::info!(pid = child.as_raw(), "DAEMON: worker started");
                wait_for_exit(child)?;
            }
        }
    }
}

fn wait_for_exit(child: Pid) -> Result<(), Error> {
    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)).map_err(Error::Wait)? {
            WaitStatus::StillAlive => std::thread::sleep(POLL_INTERVAL),
            other => {
                tracing::error!(pid = child.as_raw(), status = ?other, "DAEMON: worker died");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fork_once_splits_into_worker_and_supervisor() {
        match fork_once().unwrap() {
            Forked::Worker => std::process::exit(0),
            Forked::Supervisor { child } => {
                let status = waitpid(child, None).unwrap();
                assert!(matches!(status, WaitStatus::Exited(_, 0)));
            }
        }
    }
}
