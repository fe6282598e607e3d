//! File locks: flock(2) for the audit trail, and the POSIX record lock that
//! shadow-utils takes on `/etc/.pwd.lock` for the account store.

use crate::constants;
use crate::core::error::StoreError;
use fs2::FileExt;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::libc;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// An exclusive flock on a file. Released on drop (file close releases
/// flock).
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Acquire an exclusive lock, blocking until available.
    pub fn exclusive(path: &Path) -> Result<Self, StoreError> {
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { _file: file })
    }

    /// Try to acquire an exclusive lock without blocking.
    /// Returns `Ok(None)` if another holder has it.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>, StoreError> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(ref e) if is_contended(e) => Ok(None),
            Err(source) => Err(StoreError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Paths whose record lock is held by some thread of this process.
static HELD: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());
static RELEASED: Condvar = Condvar::new();

/// A whole-file `F_WRLCK` record lock, the lock `lckpwdf(3)` takes, so
/// passwd, useradd and friends exclude us and we exclude them.
///
/// Record locks belong to the process and any close of the file drops them,
/// so threads first pass an in-process gate keyed by path. Only the gate
/// holder opens the lock file.
#[derive(Debug)]
pub struct StoreLock {
    file: Option<File>,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock, blocking when `timeout` is `None`, otherwise polling
    /// until the deadline and failing with [`StoreError::Busy`].
    pub fn acquire(path: &Path, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        enter_gate(path, deadline)?;
        match lock_record(path, deadline) {
            Ok(file) => Ok(Self {
                file: Some(file),
                path: path.to_path_buf(),
            }),
            Err(e) => {
                leave_gate(path);
                Err(e)
            }
        }
    }

    /// Acquire the lock, blocking until available.
    pub fn exclusive(path: &Path) -> Result<Self, StoreError> {
        Self::acquire(path, None)
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // close releases the record lock; the gate opens after it
        drop(self.file.take());
        leave_gate(&self.path);
    }
}

fn enter_gate(path: &Path, deadline: Option<Instant>) -> Result<(), StoreError> {
    let mut held = HELD.lock().unwrap_or_else(|e| e.into_inner());
    while held.contains(path) {
        held = match deadline {
            None => RELEASED.wait(held).unwrap_or_else(|e| e.into_inner()),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(StoreError::Busy(path.to_path_buf()));
                }
                RELEASED
                    .wait_timeout(held, deadline - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
    }
    held.insert(path.to_path_buf());
    Ok(())
}

fn leave_gate(path: &Path) {
    let mut held = HELD.lock().unwrap_or_else(|e| e.into_inner());
    held.remove(path);
    RELEASED.notify_all();
}

fn lock_record(path: &Path, deadline: Option<Instant>) -> Result<File, StoreError> {
    let file = open_lock_file(path)?;
    let request = write_lock_request();
    let lock_err = |errno: Errno| StoreError::Lock {
        path: path.to_path_buf(),
        source: io::Error::from(errno),
    };

    let Some(deadline) = deadline else {
        loop {
            match fcntl(file.as_raw_fd(), FcntlArg::F_SETLKW(&request)) {
                Ok(_) => return Ok(file),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(lock_err(errno)),
            }
        }
    };

    let poll = Duration::from_millis(constants::LOCK_POLL_INTERVAL_MS);
    loop {
        match fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(&request)) {
            Ok(_) => return Ok(file),
            Err(Errno::EINTR) => continue,
            Err(Errno::EACCES | Errno::EAGAIN) => {}
            Err(errno) => return Err(lock_err(errno)),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(StoreError::Busy(path.to_path_buf()));
        }
        thread::sleep(poll.min(deadline - now));
    }
}

/// Write lock over the whole file (`l_len` 0 runs to EOF and beyond).
fn write_lock_request() -> libc::flock {
    libc::flock {
        l_type: libc::F_WRLCK as libc::c_short,
        l_whence: libc::SEEK_SET as libc::c_short,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    }
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .map_err(|source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        })
}

fn is_contended(e: &io::Error) -> bool {
    // fs2 on Linux may report EAGAIN as Other instead of WouldBlock
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == Some(libc::EAGAIN)
        || e.raw_os_error() == Some(libc::EWOULDBLOCK)
}
