//! The patch engine: lock, read, strip, back up, render, write, unlock.
//!
//! Every mutation of a target asset goes through [`PatchEngine`]. The
//! target is re-read on each call, the lock is held for the whole
//! read-modify-write, and the write is atomic, so a failed call leaves the
//! target exactly as it found it.

use crate::backup::{BackupManager, BackupState, LegacyClearCounter};
use crate::content::{ContentBuilder, PatchBlock};
use crate::escalate::{EscalationError, Escalator};
use crate::lock::{self, LockCoordinator, LockError, DEFAULT_LOCK_ID};
use crate::marker::Markers;
use crate::patch::{PatchSpec, ValidationError};
use crate::store::{legacy_clear_key, ContextStore, StoreError, IMAGE_PATH_KEY};
use crate::write::{escalating_write, AssetWriter, DiskWriter, Grant, WriteError};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

pub const DEFAULT_SCRIPT_NAME: &str = "workbench.desktop.main.js";
pub const DEFAULT_STYLE_NAME: &str = "workbench.desktop.main.css";
pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";
/// Local images go through the host's file scheme unless told otherwise.
pub const DEFAULT_HOST_FILE_URLS: bool = true;

/// Resolved paths and tunables for one host installation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub markers: Markers,
    pub script_path: PathBuf,
    pub style_path: PathBuf,
    pub backup_path: PathBuf,
    pub lock_dir: PathBuf,
    pub lock_id: String,
    pub lock_retries: u32,
    pub lock_retry_wait: Duration,
    pub legacy_clear_cap: u8,
    pub host_file_urls: bool,
}

impl EngineConfig {
    /// Default layout under `dir`: host asset names, `.bak` backup, lock in
    /// the OS temp dir.
    pub fn for_install_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let script_path = dir.join(DEFAULT_SCRIPT_NAME);
        let backup_path = BackupManager::sibling_of(&script_path, DEFAULT_BACKUP_SUFFIX)
            .path()
            .to_path_buf();
        Self {
            markers: Markers::default(),
            style_path: dir.join(DEFAULT_STYLE_NAME),
            script_path,
            backup_path,
            lock_dir: std::env::temp_dir(),
            lock_id: DEFAULT_LOCK_ID.to_string(),
            lock_retries: lock::DEFAULT_RETRIES,
            lock_retry_wait: lock::DEFAULT_RETRY_WAIT,
            legacy_clear_cap: LegacyClearCounter::DEFAULT_CAP,
            host_file_urls: DEFAULT_HOST_FILE_URLS,
        }
    }
}

/// The two things a caller can ask of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Install(PatchSpec),
    Uninstall,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Install(_) => OperationKind::Install,
            Operation::Uninstall => OperationKind::Uninstall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Uninstall,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Install => f.write_str("install"),
            OperationKind::Uninstall => f.write_str("uninstall"),
        }
    }
}

/// Engine state-machine phases, in the order a successful install visits
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locking,
    Reading,
    Stripping,
    BackupCheck,
    Building,
    Writing,
    Escalating,
    BackupWriting,
    LegacyClearing,
    Unlocking,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Locking => "locking",
            Phase::Reading => "reading",
            Phase::Stripping => "stripping",
            Phase::BackupCheck => "backup-check",
            Phase::Building => "building",
            Phase::Writing => "writing",
            Phase::Escalating => "escalating",
            Phase::BackupWriting => "backup-writing",
            Phase::LegacyClearing => "legacy-clearing",
            Phase::Unlocking => "unlocking",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("target file not found: {} (unsupported host version?)", path.display())]
    TargetMissing { path: PathBuf },

    #[error("another process holds the patch lock {} ({attempts} attempts)", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("permission denied writing {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: EscalationError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PatchError {
    /// Whether calling again later may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PatchError::LockTimeout { .. })
    }

    /// Whether the user dismissed an elevation prompt.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PatchError::PermissionDenied {
                source: EscalationError::Cancelled,
                ..
            }
        )
    }
}

impl From<LockError> for PatchError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Timeout { path, attempts } => PatchError::LockTimeout { path, attempts },
            LockError::Io { path, source } => PatchError::Io { path, source },
        }
    }
}

impl From<WriteError> for PatchError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::Escalation { path, source } => PatchError::PermissionDenied { path, source },
            WriteError::RetryFailed { path, source } | WriteError::Io { path, source } => {
                PatchError::Io { path, source }
            }
        }
    }
}

/// What happened to the legacy style asset during an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyClear {
    /// Uninstall, or the attempt budget is spent.
    Skipped,
    /// No legacy block; the attempt counter now stands at `attempts`.
    NotFound { attempts: u8 },
    /// A legacy block was stripped from the style asset.
    Cleared,
    Failed { reason: String },
}

/// Structured result of a successful install or uninstall.
#[derive(Debug, Clone)]
pub struct PatchReport {
    pub operation: OperationKind,
    pub target: PathBuf,
    /// Phase trail, ending in [`Phase::Done`].
    pub phases: Vec<Phase>,
    pub escalated: bool,
    pub backup: BackupState,
    pub legacy: LegacyClear,
    /// Whether the target's bytes changed.
    pub changed: bool,
    pub warnings: Vec<String>,
}

impl PatchReport {
    fn new(operation: OperationKind, target: &Path) -> Self {
        Self {
            operation,
            target: target.to_path_buf(),
            phases: vec![Phase::Idle],
            escalated: false,
            backup: BackupState::NotAttempted,
            legacy: LegacyClear::Skipped,
            changed: false,
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(operation = %self.operation, %phase, "engine phase");
        self.phases.push(phase);
    }

    fn warn(&mut self, message: String) {
        warn!(operation = %self.operation, "{message}");
        self.warnings.push(message);
    }

    pub fn final_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Idle)
    }
}

/// Read-only snapshot of the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub script_path: PathBuf,
    pub patched: bool,
    pub blocks: usize,
    pub backup_present: bool,
    pub legacy_attempts: u8,
    pub legacy_cap: u8,
    pub image: Option<String>,
    /// xxh3 of the script asset.
    pub content_hash: u64,
}

pub struct PatchEngine<S: ContextStore, E: Escalator> {
    config: EngineConfig,
    store: S,
    escalator: E,
    writer: Box<dyn AssetWriter + Send>,
    locks: LockCoordinator,
    backup: BackupManager,
    builder: ContentBuilder,
}

impl<S: ContextStore, E: Escalator> PatchEngine<S, E> {
    pub fn new(config: EngineConfig, store: S, escalator: E) -> Self {
        let locks = LockCoordinator::new(&config.lock_dir)
            .with_backoff(config.lock_retries, config.lock_retry_wait);
        let backup = BackupManager::new(&config.backup_path);
        let builder =
            ContentBuilder::new(config.markers.clone()).with_host_file_urls(config.host_file_urls);
        Self {
            config,
            store,
            escalator,
            writer: Box::new(DiskWriter),
            locks,
            backup,
            builder,
        }
    }

    /// Route asset writes through `writer` instead of the filesystem.
    pub fn with_writer(mut self, writer: impl AssetWriter + Send + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn builder(&self) -> &ContentBuilder {
        &self.builder
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn run(&mut self, operation: Operation) -> Result<PatchReport, PatchError> {
        match operation {
            Operation::Install(spec) => self.install(&spec),
            Operation::Uninstall => self.uninstall(),
        }
    }

    /// Replace any existing block in the script asset with one rendered
    /// from `spec`.
    pub fn install(&mut self, spec: &PatchSpec) -> Result<PatchReport, PatchError> {
        let block = self.builder.build(spec);
        self.execute(OperationKind::Install, Some(block))
    }

    /// Strip the block from the script asset and clear the image preference.
    pub fn uninstall(&mut self) -> Result<PatchReport, PatchError> {
        self.execute(OperationKind::Uninstall, None)
    }

    /// Inspect the installation without taking the lock or writing anything.
    pub fn status(&self) -> Result<Status, PatchError> {
        let content = read_target(&self.config.script_path)?;
        let markers = &self.config.markers;
        let counter = LegacyClearCounter::load(
            &self.store,
            &legacy_clear_key(markers.extension_id()),
            self.config.legacy_clear_cap,
        );
        Ok(Status {
            script_path: self.config.script_path.clone(),
            patched: markers.is_patched(&content),
            blocks: markers.count_blocks(&content),
            backup_present: self.backup.exists(),
            legacy_attempts: counter.attempts(),
            legacy_cap: counter.cap(),
            image: self.store.get_str(IMAGE_PATH_KEY).filter(|s| !s.is_empty()),
            content_hash: xxh3_64(content.as_bytes()),
        })
    }

    fn execute(
        &mut self,
        operation: OperationKind,
        block: Option<PatchBlock>,
    ) -> Result<PatchReport, PatchError> {
        let mut report = PatchReport::new(operation, &self.config.script_path);

        report.enter(Phase::Locking);
        let result = match self.locks.acquire(&self.config.lock_id) {
            Ok(handle) => {
                let outcome = self.critical_section(&mut report, block.as_ref());
                report.enter(Phase::Unlocking);
                handle.release();
                outcome
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                report.enter(Phase::Done);
                info!(
                    %operation,
                    target = %report.target.display(),
                    changed = report.changed,
                    escalated = report.escalated,
                    "patch operation complete"
                );
                Ok(report)
            }
            Err(e) => {
                report.enter(Phase::Failed);
                warn!(%operation, error = %e, "patch operation failed");
                Err(e)
            }
        }
    }

    fn critical_section(
        &mut self,
        report: &mut PatchReport,
        block: Option<&PatchBlock>,
    ) -> Result<(), PatchError> {
        let script_path = self.config.script_path.clone();

        report.enter(Phase::Reading);
        let original = read_target(&script_path)?;

        report.enter(Phase::Stripping);
        let stripped = self.config.markers.strip(&original);

        report.enter(Phase::BackupCheck);
        let needs_backup = !self.backup.exists();

        let updated = match block {
            Some(block) => {
                report.enter(Phase::Building);
                let mut updated = String::with_capacity(stripped.len() + block.as_str().len());
                updated.push_str(&stripped);
                updated.push_str(block.as_str());
                updated
            }
            None => stripped.clone(),
        };

        // The preference is cleared before the target changes and put back
        // if the write fails, so a store failure leaves both untouched.
        let cleared_image = match report.operation {
            OperationKind::Uninstall => self.clear_image_preference()?,
            OperationKind::Install => None,
        };

        report.changed = updated != original;
        if report.changed {
            report.enter(Phase::Writing);
            let written = escalating_write(
                &self.writer,
                &script_path,
                updated.as_bytes(),
                &self.escalator,
                Grant::Existing,
            );
            let outcome = match written {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(previous) = cleared_image {
                        self.restore_image_preference(previous);
                    }
                    return Err(e.into());
                }
            };
            if outcome.escalated() {
                report.enter(Phase::Escalating);
                report.enter(Phase::Writing);
                report.escalated = true;
            }
        } else {
            debug!(path = %script_path.display(), "content unchanged, skipping write");
        }

        if needs_backup {
            report.enter(Phase::BackupWriting);
            let backup = self
                .backup
                .ensure_backup(&stripped, &self.writer, &self.escalator);
            match &backup {
                BackupState::Created { escalated: true } => report.escalated = true,
                BackupState::Failed { reason } => {
                    report.warn(format!("backup not captured: {reason}"));
                }
                _ => {}
            }
            report.backup = backup;
        } else {
            report.backup = BackupState::AlreadyPresent;
        }

        if report.operation == OperationKind::Install {
            report.enter(Phase::LegacyClearing);
            let legacy = self.clear_legacy(report);
            report.legacy = legacy;
        }

        Ok(())
    }

    /// Remove the image preference, returning the value it held.
    fn clear_image_preference(&mut self) -> Result<Option<serde_json::Value>, PatchError> {
        let previous = self.store.get(IMAGE_PATH_KEY);
        if previous.is_some() {
            self.store.remove(IMAGE_PATH_KEY)?;
        }
        Ok(previous)
    }

    fn restore_image_preference(&mut self, previous: serde_json::Value) {
        if let Err(e) = self.store.set(IMAGE_PATH_KEY, previous) {
            warn!(error = %e, "image preference not restored after failed write");
        }
    }

    /// Strip blocks left in the style asset by older releases, counting
    /// attempts that find nothing.
    fn clear_legacy(&mut self, report: &mut PatchReport) -> LegacyClear {
        let markers = &self.config.markers;
        let key = legacy_clear_key(markers.extension_id());
        let mut counter = LegacyClearCounter::load(&self.store, &key, self.config.legacy_clear_cap);
        if counter.is_exhausted() {
            return LegacyClear::Skipped;
        }

        let style_path = &self.config.style_path;
        let content = match fs::read_to_string(style_path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                let reason = format!("cannot read {}: {e}", style_path.display());
                report.warn(format!("legacy style check failed: {reason}"));
                return LegacyClear::Failed { reason };
            }
        };

        if let Some(content) = content.filter(|c| markers.is_patched(c)) {
            let stripped = markers.strip(&content);
            return match escalating_write(
                &self.writer,
                style_path,
                stripped.as_bytes(),
                &self.escalator,
                Grant::Existing,
            ) {
                Ok(outcome) => {
                    info!(path = %style_path.display(), "legacy style block cleared");
                    if outcome.escalated() {
                        report.escalated = true;
                    }
                    LegacyClear::Cleared
                }
                Err(e) => {
                    report.warn(format!("legacy style block not cleared: {e}"));
                    LegacyClear::Failed {
                        reason: e.to_string(),
                    }
                }
            };
        }

        counter.increment();
        if let Err(e) = counter.save(&mut self.store, &key) {
            report.warn(format!("legacy counter not saved: {e}"));
        }
        LegacyClear::NotFound {
            attempts: counter.attempts(),
        }
    }
}

fn read_target(path: &Path) -> Result<String, PatchError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PatchError::TargetMissing {
                path: path.to_path_buf(),
            }
        } else {
            PatchError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
