//! One-time pristine snapshot of the script asset, and the bounded counter
//! that gates legacy style-file clearing.
//!
//! The backup is a recovery artifact for users, not the uninstall source:
//! uninstall re-derives the original by stripping the live file. Once the
//! backup exists it is never rewritten.

use crate::escalate::Escalator;
use crate::store::{ContextStore, StoreError};
use crate::write::{escalating_write, AssetWriter, Grant};
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of [`BackupManager::ensure_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupState {
    /// Captured by this call.
    Created { escalated: bool },
    /// A backup already existed and was left alone.
    AlreadyPresent,
    /// Capture was attempted and failed; the patch itself is unaffected.
    Failed { reason: String },
    /// Not part of this operation.
    NotAttempted,
}

impl BackupState {
    pub fn is_failed(&self) -> bool {
        matches!(self, BackupState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    path: PathBuf,
}

impl BackupManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sibling backup path for `target`: same directory, `suffix` appended.
    pub fn sibling_of(target: &Path, suffix: &str) -> Self {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        Self::new(target.with_file_name(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    /// Capture `stripped` as the backup unless one already exists.
    ///
    /// Never returns an error: a failed capture is reported in the state so
    /// the caller can carry on with the patch.
    pub fn ensure_backup(
        &self,
        stripped: &str,
        writer: &dyn AssetWriter,
        escalator: &dyn Escalator,
    ) -> BackupState {
        if self.exists() {
            return BackupState::AlreadyPresent;
        }

        match escalating_write(
            writer,
            &self.path,
            stripped.as_bytes(),
            escalator,
            Grant::Create,
        ) {
            Ok(outcome) => {
                info!(path = %self.path.display(), "backup captured");
                BackupState::Created {
                    escalated: outcome.escalated(),
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "backup capture failed");
                BackupState::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Persisted `{ attempts, cap }` counter for legacy style-file checks.
///
/// Each install that finds no legacy block in the style asset counts one
/// attempt; once `attempts` reaches `cap` the check is skipped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyClearCounter {
    attempts: u8,
    cap: u8,
}

impl LegacyClearCounter {
    pub const DEFAULT_CAP: u8 = 5;

    pub fn new(attempts: u8, cap: u8) -> Self {
        Self {
            attempts: attempts.min(cap),
            cap,
        }
    }

    pub fn load(store: &dyn ContextStore, key: &str, cap: u8) -> Self {
        let stored = store.get_u64(key).unwrap_or(0);
        Self::new(u8::try_from(stored).unwrap_or(u8::MAX), cap)
    }

    pub fn save(&self, store: &mut dyn ContextStore, key: &str) -> Result<(), StoreError> {
        store.set(key, json!(self.attempts))
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn cap(&self) -> u8 {
        self.cap
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.cap
    }

    /// Count one attempt; returns `false` once the cap is reached.
    pub fn increment(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts += 1;
        true
    }
}
