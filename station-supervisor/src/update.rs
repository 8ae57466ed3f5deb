//! Firmware self-update dispatch, grounded on `sys_runUpdate`/
//! `sys_abortUpdate`/`sys_execCommand`'s `max_wait==0` branch in
//! `examples/original_source/src-linux/sys_linux.c`: a double fork detaches
//! the freshly-updated binary from the supervisor so it is reparented to
//! init rather than left as a child the supervisor would otherwise have to
//! reap, while the supervisor itself only blocks briefly on the
//! intermediate process's own near-immediate exit.

use std::ffi::CString;
use std::path::Path;

use nix::sys::wait::waitpid;
use nix::unistd::{self, AccessFlags, ForkResult};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("waitpid failed: {0}")]
    Wait(#[source] nix::Error),
    #[error("exec failed: {0}")]
    Exec(#[source] nix::Error),
}

/// Run a pending update image if one is staged and executable, detaching it
/// so it survives independently of this process. A no-op if nothing is
/// staged (mirrors `access(updfile, X_OK) != 0` simply returning).
pub fn run_pending(update_path: &Path) -> Result<(), Error> {
    if unistd::access(update_path, AccessFlags::X_OK).is_err() {
        return Ok(());
    }

    let path = CString::new(update_path.as_os_str().to_string_lossy().into_owned()).expect("path has no interior NUL");

    match unsafe { unistd::fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            match unsafe { unistd::fork() }.map_err(Error::Fork)? {
                ForkResult::Child => {
                    let argv = [path.clone()];
                    let _ = unistd::execv(&path, &argv);
                    // execv only returns on failure.
                    std::process::exit(9);
                }
                ForkResult::Parent { .. } => std::process::exit(0),
            }
        }
        ForkResult::Parent { child } => {
            waitpid(child, None).map_err(Error::Wait)?;
            Ok(())
        }
    }
}

/// `sys_abortUpdate`: unconditionally unlink the committed image. Safe to
/// call at any time.
pub fn abort(update_path: &Path) {
    let _ = std::fs::remove_file(update_path);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn run_pending_is_noop_when_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("update.bin");
        run_pending(&missing).unwrap();
    }

    #[test]
    fn abort_is_noop_when_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        abort(&dir.path().join("update.bin"));
    }
}
