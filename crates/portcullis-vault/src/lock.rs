//! Advisory locks on the state files
//!
//! The daemon and `portcullis-admin` open the same credential and enrollment
//! files. Every read-modify-write holds an exclusive `flock` on a sidecar
//! lock file and re-reads the state under it; readers hold a shared lock
//! while loading. Each acquisition opens its own descriptor, so threads of
//! one process exclude each other exactly as separate processes do.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use portcullis_core::Result;

/// Lock file guarding one state file
#[derive(Debug, Clone)]
pub(crate) struct FileLock {
    path: PathBuf,
}

/// A held lock, released on drop
#[derive(Debug)]
pub(crate) struct LockGuard {
    file: File,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Shared,
    Exclusive,
}

impl FileLock {
    /// Lock for `state`, kept at `<state>.lock`
    pub fn beside(state: &Path) -> Self {
        let mut name = state
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        Self {
            path: state.with_file_name(name),
        }
    }

    /// Block until no other holder remains
    pub fn exclusive(&self) -> Result<LockGuard> {
        self.acquire(Mode::Exclusive)
    }

    /// Block until no exclusive holder remains
    pub fn shared(&self) -> Result<LockGuard> {
        self.acquire(Mode::Shared)
    }

    fn acquire(&self, mode: Mode) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(&self.path)?;
        flock(&file, mode)?;
        Ok(LockGuard { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
    }
}

#[cfg(unix)]
fn flock(file: &File, mode: Mode) -> io::Result<()> {
    let operation = match mode {
        Mode::Shared => libc::LOCK_SH,
        Mode::Exclusive => libc::LOCK_EX,
    };
    flock_raw(file, operation)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    flock_raw(file, libc::LOCK_UN)
}

#[cfg(unix)]
fn flock_raw(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: `file` owns a valid descriptor for the duration of the call
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: Mode) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_file_sits_beside_state() {
        let dir = tempdir().unwrap();
        let lock = FileLock::beside(&dir.path().join("credentials.json"));
        let _guard = lock.exclusive().unwrap();
        assert!(dir.path().join("credentials.json.lock").exists());
        assert!(!dir.path().join("credentials.json").exists());
    }

    #[test]
    fn test_exclusive_waits_for_holder() {
        let dir = tempdir().unwrap();
        let lock = FileLock::beside(&dir.path().join("state.json"));
        let held = lock.exclusive().unwrap();

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let waiter = thread::spawn(move || {
            let _guard = other.exclusive().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_shared_holders_coexist() {
        let dir = tempdir().unwrap();
        let lock = FileLock::beside(&dir.path().join("state.json"));
        let first = lock.shared().unwrap();
        let second = lock.shared().unwrap();
        drop((first, second));
        lock.exclusive().unwrap();
    }
}
