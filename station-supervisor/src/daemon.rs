//! Fork into a detached daemon, grounded on `sys_main`'s `opts->daemon`
//! branch in `examples/original_source/src-linux/sys_linux.c`: the parent
//! writes the child's pid to the pid file and exits; the child calls
//! `setsid()` and becomes session leader so the controlling terminal can go
//! away without killing it.
//!
//! Must be called before the `tokio` runtime starts: `fork()` only promises
//! well-defined behavior in a single-threaded process, and a running `tokio`
//! runtime has worker threads.

use std::path::Path;

use nix::unistd::{self, ForkResult, Pid};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("setsid failed: {0}")]
    Setsid(#[source] nix::Error),
    #[error(transparent)]
    PidFile(#[from] crate::pidfile::Error),
}

/// Outcome of [`daemonize`]: the parent is told nothing further runs here
/// (its caller should exit 0); the child is the detached daemon process and
/// continues.
pub enum Outcome {
    ParentShouldExit,
    Daemonized,
}

/// Fork once, write the child's pid to `<temp_dir>/station.pid`, detach the
/// child into its own session. Returns `Outcome::ParentShouldExit` in the
/// parent.
pub fn daemonize(temp_dir: &Path) -> Result<Outcome, Error> {
    match unsafe { unistd::fork() }.map_err(Error::Fork)? {
        ForkResult::Parent { child } => {
            crate::pidfile::write(temp_dir, child.as_raw())?;
            eprintln!("Daemon pid={} running...", child.as_raw());
            Ok(Outcome::ParentShouldExit)
        }
        ForkResult::Child => {
            unistd::setsid().map_err(Error::Setsid)?;
            Ok(Outcome::Daemonized)
        }
    }
}

/// Whether this process is itself the daemon's direct worker (`daemonPid`
/// set and matching the pid-file entry is the parent's business; the worker
/// side only needs its own pid for logging).
pub fn own_pid() -> Pid {
    unistd::getpid()
}
