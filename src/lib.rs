//! Background Patcher: removable background-image patches for an editor's
//! compiled workbench assets
//!
//! The engine injects a marker-delimited block of generated styling into a
//! host asset file it does not own, and can always take it out again.
//!
//! # Architecture
//!
//! Every mutation goes through [`PatchEngine`], which runs one sequential
//! flow per call: lock, read, strip any prior block, capture a backup if
//! none exists, render the new block, write atomically (escalating once on
//! a permission error), unlock. Rendering ([`ContentBuilder`]) and marker
//! scanning ([`Markers`]) are pure; I/O, locking and escalation sit behind
//! small types that tests can substitute.
//!
//! # Safety
//!
//! - At most one patch block per target, enforced by strip-then-append
//! - Atomic file writes (tempfile + fsync + rename)
//! - Cross-process file lock with bounded backoff, released on every exit path
//! - Target paths confined to the host's install directory
//! - Backup captured once from the unpatched content and never rewritten
//!
//! # Example
//!
//! ```no_run
//! use background_patcher::{
//!     BlendMode, EngineConfig, ImageReference, MemoryStore, NoopEscalator, PatchEngine,
//!     PatchSpec, SizeMode,
//! };
//!
//! let config = EngineConfig::for_install_dir("/usr/share/code/resources/app/out/vs/workbench");
//! let mut engine = PatchEngine::new(config, MemoryStore::new(), NoopEscalator::default());
//!
//! let spec = PatchSpec::new(
//!     ImageReference::parse("https://example.com/bg.png"),
//!     0.2,
//!     0.0,
//!     SizeMode::Cover,
//!     BlendMode::new("lighten"),
//! )?;
//!
//! match engine.install(&spec) {
//!     Ok(report) => println!("patched: {:?}", report.phases),
//!     Err(e) => eprintln!("install failed: {}", e),
//! }
//! # Ok::<(), background_patcher::ValidationError>(())
//! ```

pub mod backup;
pub mod config;
pub mod content;
pub mod engine;
pub mod escalate;
pub mod image;
pub mod lock;
pub mod marker;
pub mod patch;
pub mod safety;
pub mod store;
pub mod write;

// Re-exports
pub use backup::{BackupManager, BackupState, LegacyClearCounter};
pub use config::{
    load_from_path, load_from_str, load_or_default, BackgroundOverrides, ConfigError, ConfigOrigin,
    FileConfig, ResolveError,
};
pub use content::{render_css, ContentBuilder, PatchBlock};
pub use engine::{
    EngineConfig, LegacyClear, Operation, OperationKind, PatchEngine, PatchError, PatchReport,
    Phase, Status,
};
pub use escalate::{
    EscalationError, Escalator, NoopEscalator, Platform, PlatformCommand, SystemEscalator,
};
pub use lock::{LockCoordinator, LockError, LockHandle};
pub use marker::Markers;
pub use patch::{BlendMode, ImageReference, PatchSpec, SizeMode, ThemeKind, ValidationError};
pub use safety::{GuardError, InstallGuard};
pub use store::{ContextStore, JsonFileStore, MemoryStore, StoreError};
pub use write::{
    atomic_write, escalating_write, AssetWriter, DiskWriter, Grant, WriteError, WriteOutcome,
};
