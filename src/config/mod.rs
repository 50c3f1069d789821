pub mod loader;
pub mod schema;

pub use loader::{
    default_config_path, load_from_path, load_from_str, load_or_default, ConfigError, ConfigOrigin,
    LoadedConfig,
};
pub use schema::{BackgroundSection, EngineSection, FileConfig, ValidationError, ValidationIssue};

use crate::backup::BackupManager;
use crate::engine::EngineConfig;
use crate::lock::DEFAULT_LOCK_ID;
use crate::marker::Markers;
use crate::patch::{self, BlendMode, ImageReference, PatchSpec, SizeMode, ThemeKind};
use crate::safety::{GuardError, InstallGuard};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no install directory configured (set [engine].install_dir or pass --install-dir)")]
    MissingInstallDir,

    #[error("no background image configured (set [background].image or pass --image)")]
    MissingImage,

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Spec(#[from] patch::ValidationError),
}

/// Command-line values that take precedence over `[background]`.
#[derive(Debug, Clone, Default)]
pub struct BackgroundOverrides {
    pub image: Option<String>,
    pub opacity: Option<f64>,
    pub blur: Option<f64>,
    pub size_mode: Option<String>,
    pub blend_mode: Option<String>,
    pub theme: Option<String>,
}

impl BackgroundSection {
    /// Build the patch request, overrides first. An explicit blend mode wins
    /// over the one derived from the theme.
    pub fn to_spec(&self, overrides: &BackgroundOverrides) -> Result<PatchSpec, ResolveError> {
        let image = overrides
            .image
            .as_deref()
            .or(self.image.as_deref())
            .ok_or(ResolveError::MissingImage)?;
        let size_mode: SizeMode = overrides
            .size_mode
            .as_deref()
            .unwrap_or(&self.size_mode)
            .parse()?;
        let theme: ThemeKind = overrides.theme.as_deref().unwrap_or(&self.theme).parse()?;
        let blend_mode = overrides
            .blend_mode
            .as_deref()
            .or(self.blend_mode.as_deref())
            .map(BlendMode::new)
            .unwrap_or_else(|| BlendMode::for_theme(theme));

        Ok(PatchSpec::new(
            ImageReference::parse(image),
            overrides.opacity.unwrap_or(self.opacity),
            overrides.blur.unwrap_or(self.blur),
            size_mode,
            blend_mode,
        )?)
    }
}

impl EngineSection {
    /// Resolve target paths under the install directory, refusing any that
    /// escape it.
    pub fn to_engine_config(
        &self,
        install_dir_override: Option<&Path>,
    ) -> Result<EngineConfig, ResolveError> {
        let install_dir = install_dir_override
            .or(self.install_dir.as_deref())
            .ok_or(ResolveError::MissingInstallDir)?;
        let guard = InstallGuard::new(install_dir)?;

        let script_path = guard.validate_path(&self.script_name)?;
        let style_path = guard.validate_path(&self.style_name)?;
        let backup_path =
            guard.validate_path(BackupManager::sibling_of(&script_path, &self.backup_suffix).path())?;

        Ok(EngineConfig {
            markers: Markers::new(self.extension_id.trim()),
            script_path,
            style_path,
            backup_path,
            lock_dir: self.lock_dir.clone().unwrap_or_else(std::env::temp_dir),
            lock_id: DEFAULT_LOCK_ID.to_string(),
            lock_retries: self.lock_retries,
            lock_retry_wait: Duration::from_millis(self.lock_retry_wait_ms),
            legacy_clear_cap: self.legacy_clear_cap,
            host_file_urls: self.host_file_urls,
        })
    }
}
