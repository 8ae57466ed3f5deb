//! PID-file takeover: `<temp>/station.pid` records whichever process owns the
//! station right now (the daemon's own pid if daemonized, otherwise the
//! worker's), grounded on `makePidFilename`/`readPid`/`writePid`/`killOldPid`
//! in `examples/original_source/src-linux/sys_linux.c`.

use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::unistd::{getpgid, Pid};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("reading {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("writing {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

pub fn path(temp_dir: &Path) -> PathBuf {
    temp_dir.join("station.pid")
}

/// `0` if the file is missing, empty, or not a valid decimal pid — matching
/// `readPid`'s `max(0, rt_readDec(...))` clamp.
pub fn read(temp_dir: &Path) -> i32 {
    let p = path(temp_dir);
    match std::fs::read_to_string(&p) {
        Ok(s) => s.trim().parse::<i32>().unwrap_or(0).max(0),
        Err(_) => 0,
    }
}

pub fn write(temp_dir: &Path, pid: i32) -> Result<(), Error> {
    let p = path(temp_dir);
    std::fs::write(&p, pid.to_string()).map_err(|source| Error::Write { path: p, source })
}

/// Is some process still alive with this pid? (`kill(pid, 0) == 0`)
pub fn is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

/// Send `SIGINT`, wait briefly, then `SIGKILL`; targets the whole process
/// group when `pid` is itself a group leader (`killOldPid`'s `getpgid`
/// comparison). Safe to call when nothing is running: `kill` on a dead pid is
/// a cheap no-op error we ignore.
///
/// Synchronous and blocking (a 2ms sleep): called only from the pre-runtime
/// startup path, alongside [`crate::daemon::daemonize`], where no `tokio`
/// runtime exists yet to await on.
pub fn kill_old_instance(temp_dir: &Path) {
    let pid = read(temp_dir);
    if pid <= 0 {
        return;
    }
    let target = Pid::from_raw(pid);
    let is_group_leader = getpgid(Some(target)).map(|pgid| pgid == target).unwrap_or(false);

    let (int_target, kill_target) = if is_group_leader {
        tracing::warn!(pid, "killing process group");
        (Pid::from_raw(-pid), Pid::from_raw(-pid))
    } else {
        tracing::warn!(pid, "killing process");
        (target, target)
    };

    let _ = signal::kill(int_target, Signal::SIGINT);
    std::thread::sleep(std::time::Duration::from_millis(2));
    let _ = signal::kill(kill_target, Signal::SIGKILL);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_defaults_to_zero_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read(dir.path()), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), 4242).unwrap();
        assert_eq!(read(dir.path()), 4242);
    }

    #[test]
    fn read_clamps_negative_and_garbage_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(path(dir.path()), "not-a-pid").unwrap();
        assert_eq!(read(dir.path()), 0);
    }

    #[test]
    fn is_alive_true_for_own_process() {
        assert!(is_alive(std::process::id() as i32));
    }
}
