//! Cross-process advisory lock around the patch/unpatch critical section.
//!
//! Several editor windows, each in its own process, may try to patch the
//! same shared asset at once. The lock is an OS file lock on
//! `<lock_dir>/<lock_id>.lock`, polled with a fixed backoff. It is not
//! reentrant: a second acquire from the same process contends like any
//! other. The lock is released when the [`LockHandle`] is dropped, so every
//! exit path of the critical section releases it.

use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Number of acquisition attempts before giving up.
pub const DEFAULT_RETRIES: u32 = 10;

/// Pause between acquisition attempts.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(100);

/// Lock name shared by every process patching the same host.
pub const DEFAULT_LOCK_ID: &str = "vscode-background";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock {} still held after {attempts} attempts", path.display())]
    Timeout { path: PathBuf, attempts: u32 },

    #[error("failed to open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct LockCoordinator {
    dir: PathBuf,
    retries: u32,
    retry_wait: Duration,
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl LockCoordinator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retries: DEFAULT_RETRIES,
            retry_wait: DEFAULT_RETRY_WAIT,
        }
    }

    pub fn with_backoff(mut self, retries: u32, retry_wait: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_wait = retry_wait;
        self
    }

    pub fn lock_path(&self, lock_id: &str) -> PathBuf {
        self.dir.join(format!("{lock_id}.lock"))
    }

    /// Block until the named lock is held or the retry budget runs out.
    pub fn acquire(&self, lock_id: &str) -> Result<LockHandle, LockError> {
        let path = self.lock_path(lock_id);
        let file = open_lock_file(&path).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        for attempt in 1..=self.retries {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "lock acquired");
                    return Ok(LockHandle { file, path });
                }
                Err(e) if is_contended(&e) => {
                    trace!(path = %path.display(), attempt, "lock busy");
                    if attempt < self.retries {
                        thread::sleep(self.retry_wait);
                    }
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }

        Err(LockError::Timeout {
            path,
            attempts: self.retries,
        })
    }
}

/// Open (creating if needed) the lock file. A file another user created is
/// opened read-only; the advisory lock does not need write access.
fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let opened = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path);
    match opened {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && path.exists() => {
            debug!(path = %path.display(), "lock file not writable, opening read-only");
            File::open(path)
        }
        other => other,
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

/// Exclusive hold on a named lock. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "explicit unlock failed, closing handle");
        } else {
            debug!(path = %self.path.display(), "lock released");
        }
    }
}
