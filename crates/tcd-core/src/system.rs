//! Single-instance guard.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::CoreError;

/// Create attempts before giving up on a lock that is replaced under us.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Lock file held for the lifetime of the process.
///
/// The file contains the owner's PID. It is removed when the guard is dropped.
#[derive(Debug)]
#[must_use = "dropping the guard releases the lock"]
pub struct InstanceGuard {
    path: PathBuf,
}

impl InstanceGuard {
    /// Takes the lock at `path`.
    ///
    /// Fails with [`CoreError::InstanceRunning`] if the file names a live process. A lock left by
    /// a dead process is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();

        for _ in 0..ACQUIRE_ATTEMPTS {
            match try_create(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), pid = std::process::id(), "instance lock acquired");
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            let seen = read_pid(&path);
            if let Some(pid) = seen
                && pid_alive(pid)
            {
                return Err(CoreError::InstanceRunning { pid });
            }
            warn!(path = %path.display(), stale_pid = ?seen, "removing stale instance lock");
            remove_if_unchanged(&path, seen)?;
        }

        Err(CoreError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("instance lock {} keeps reappearing", path.display()),
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove instance lock");
        }
    }
}

/// `<temp dir>/<app>.lock`.
pub fn default_lock_path(app: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{app}.lock"))
}

fn try_create(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes a lock judged stale, unless its content changed since it was read.
///
/// A competing process that replaced the lock in the meantime keeps it, and the next create
/// attempt sees its live PID. The re-read and the removal are still two separate syscalls, so a
/// replacement landing exactly between them is lost.
fn remove_if_unchanged(path: &Path, seen: Option<u32>) -> io::Result<()> {
    if read_pid(path) != seen {
        debug!(path = %path.display(), "instance lock replaced concurrently; left in place");
        return Ok(());
    }
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }
    // No signal is sent; only existence and permission are checked.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_lock() -> PathBuf {
        std::env::temp_dir().join(format!("tcd-test-{}.lock", uuid::Uuid::new_v4()))
    }

    #[test]
    fn acquire_writes_pid_and_drop_removes() {
        let path = temp_lock();
        let guard = InstanceGuard::acquire(&path).unwrap();

        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(guard.path(), path.as_path());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let path = temp_lock();
        let _guard = InstanceGuard::acquire(&path).unwrap();

        match InstanceGuard::acquire(&path) {
            Err(CoreError::InstanceRunning { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stale_lock_is_replaced() {
        let path = temp_lock();
        // Unparsable content counts as stale.
        fs::write(&path, "not-a-pid").unwrap();

        let guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        drop(guard);
    }

    #[cfg(unix)]
    #[test]
    fn dead_owner_lock_is_replaced() {
        let path = temp_lock();
        // Above any pid_max, so no such process exists.
        fs::write(&path, i32::MAX.to_string()).unwrap();
        assert!(!pid_alive(i32::MAX as u32));

        let guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        drop(guard);
    }

    #[test]
    fn concurrently_replaced_lock_is_kept() {
        let path = temp_lock();
        fs::write(&path, std::process::id().to_string()).unwrap();

        // Judged stale while it held something else: the new owner's lock survives.
        remove_if_unchanged(&path, None).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));

        remove_if_unchanged(&path, Some(std::process::id())).unwrap();
        assert!(!path.exists());
        // Already gone is fine.
        remove_if_unchanged(&path, None).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn own_pid_counts_as_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(0));
    }

    #[test]
    fn default_path_is_in_temp_dir() {
        let path = default_lock_path("tcd-demo");
        assert!(path.starts_with(std::env::temp_dir()));
        assert!(path.ends_with("tcd-demo.lock"));
    }
}
