use crate::escalate::{EscalationError, Escalator};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("escalation failed for {}: {source}", path.display())]
    Escalation {
        path: PathBuf,
        #[source]
        source: EscalationError,
    },

    #[error("write to {} failed after escalation: {source}", path.display())]
    RetryFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How a write that needed escalation should prepare the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// The file exists; make it writable.
    Existing,
    /// The file may not exist; create it writable.
    Create,
}

/// What it took to get the bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "WriteOutcome reports whether escalation was needed"]
pub enum WriteOutcome {
    Written,
    WrittenAfterEscalation,
}

impl WriteOutcome {
    pub fn escalated(self) -> bool {
        matches!(self, WriteOutcome::WrittenAfterEscalation)
    }
}

/// Where asset bytes land. [`DiskWriter`] is the real filesystem; tests
/// substitute writers that refuse on cue.
pub trait AssetWriter {
    /// Replace `path` with `content` in one step.
    fn replace(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Overwrite an existing file through its own handle.
    fn overwrite_in_place(&self, path: &Path, content: &[u8]) -> io::Result<()>;
}

impl<T: AssetWriter + ?Sized> AssetWriter for Box<T> {
    fn replace(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        (**self).replace(path, content)
    }

    fn overwrite_in_place(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        (**self).overwrite_in_place(path, content)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskWriter;

impl AssetWriter for DiskWriter {
    fn replace(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        atomic_write(path, content)
    }

    fn overwrite_in_place(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        direct_write(path, content)
    }
}

/// Write `content` to `path`, escalating once on a permission error.
///
/// The first attempt is an atomic replace. If it is refused, the escalator
/// runs the command set for `grant` and the write is retried exactly once;
/// a second failure is returned as [`WriteError::RetryFailed`].
///
/// Escalation grants access to the file, not its directory. When the
/// directory still refuses the replace, the retry overwrites the file in
/// place, and that path is not crash-safe: an interruption mid-write can
/// leave the target truncated. The pristine backup is the recovery source
/// in that case.
pub fn escalating_write(
    writer: &dyn AssetWriter,
    path: &Path,
    content: &[u8],
    escalator: &dyn Escalator,
    grant: Grant,
) -> Result<WriteOutcome, WriteError> {
    match writer.replace(path, content) {
        Ok(()) => return Ok(WriteOutcome::Written),
        Err(e) if is_permission_error(&e) => {
            warn!(path = %path.display(), error = %e, "write refused, escalating");
        }
        Err(source) => {
            return Err(WriteError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    let escalated = match grant {
        Grant::Existing => escalator.grant_write_access(path),
        Grant::Create => escalator.create_writable(path),
    };
    escalated.map_err(|source| WriteError::Escalation {
        path: path.to_path_buf(),
        source,
    })?;

    retry_write(writer, path, content).map_err(|source| WriteError::RetryFailed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(WriteOutcome::WrittenAfterEscalation)
}

/// The single post-escalation attempt.
fn retry_write(writer: &dyn AssetWriter, path: &Path, content: &[u8]) -> io::Result<()> {
    match writer.replace(path, content) {
        Err(e) if is_permission_error(&e) && path.exists() => {
            warn!(path = %path.display(), "directory not writable, overwriting file in place");
            writer.overwrite_in_place(path, content)
        }
        other => other,
    }
}

pub fn is_permission_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::PermissionDenied
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes. The replaced file's
/// permissions are carried over to the new one.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;

    temp.write_all(content)?;

    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }

    // Flush to disk (fsync)
    temp.as_file().sync_all()?;

    // Atomic rename
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Truncate-and-write through an existing file handle.
fn direct_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
