use crate::patch::{SizeMode, ThemeKind, MAX_BLUR};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub background: BackgroundSection,
}

impl FileConfig {
    /// Check every field, collecting all problems before failing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        self.engine.collect_issues(&mut issues);
        self.background.collect_issues(&mut issues);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub extension_id: String,
    pub install_dir: Option<PathBuf>,
    pub script_name: String,
    pub style_name: String,
    pub backup_suffix: String,
    pub lock_dir: Option<PathBuf>,
    pub lock_retries: u32,
    pub lock_retry_wait_ms: u64,
    pub legacy_clear_cap: u8,
    /// Serve local images through the host's file scheme.
    pub host_file_urls: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            extension_id: crate::marker::DEFAULT_EXTENSION_ID.to_string(),
            install_dir: None,
            script_name: crate::engine::DEFAULT_SCRIPT_NAME.to_string(),
            style_name: crate::engine::DEFAULT_STYLE_NAME.to_string(),
            backup_suffix: crate::engine::DEFAULT_BACKUP_SUFFIX.to_string(),
            lock_dir: None,
            lock_retries: crate::lock::DEFAULT_RETRIES,
            lock_retry_wait_ms: crate::lock::DEFAULT_RETRY_WAIT.as_millis() as u64,
            legacy_clear_cap: crate::backup::LegacyClearCounter::DEFAULT_CAP,
            host_file_urls: crate::engine::DEFAULT_HOST_FILE_URLS,
        }
    }
}

impl EngineSection {
    fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        let id = self.extension_id.trim();
        if id.is_empty() {
            issues.push(ValidationIssue::MissingField {
                section: "engine",
                field: "extension_id",
            });
        } else if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            issues.push(ValidationIssue::InvalidValue {
                section: "engine",
                field: "extension_id",
                message: format!("'{id}' may only contain letters, digits, '.', '_' and '-'"),
            });
        }

        for (field, name) in [
            ("script_name", &self.script_name),
            ("style_name", &self.style_name),
        ] {
            if name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    section: "engine",
                    field,
                });
            } else if name.contains(['/', '\\']) {
                issues.push(ValidationIssue::InvalidValue {
                    section: "engine",
                    field,
                    message: format!("'{name}' must be a file name, not a path"),
                });
            }
        }

        if self.script_name == self.style_name && !self.script_name.is_empty() {
            issues.push(ValidationIssue::InvalidCombo {
                message: "script_name and style_name must differ".to_string(),
            });
        }

        if self.backup_suffix.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                section: "engine",
                field: "backup_suffix",
            });
        }

        if self.lock_retries == 0 {
            issues.push(ValidationIssue::InvalidValue {
                section: "engine",
                field: "lock_retries",
                message: "must be at least 1".to_string(),
            });
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundSection {
    pub image: Option<String>,
    pub opacity: f64,
    pub blur: f64,
    pub size_mode: String,
    pub blend_mode: Option<String>,
    pub theme: String,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        Self {
            image: None,
            opacity: 0.2,
            blur: 0.0,
            size_mode: SizeMode::default().config_name().to_string(),
            blend_mode: None,
            theme: "dark".to_string(),
        }
    }
}

impl BackgroundSection {
    fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        if let Some(image) = &self.image {
            if image.trim().is_empty() {
                issues.push(ValidationIssue::InvalidValue {
                    section: "background",
                    field: "image",
                    message: "must not be empty".to_string(),
                });
            }
        }

        if !self.opacity.is_finite() || self.opacity < 0.0 {
            issues.push(ValidationIssue::InvalidValue {
                section: "background",
                field: "opacity",
                message: format!("must be >= 0, got {}", self.opacity),
            });
        }

        if !self.blur.is_finite() || !(0.0..=MAX_BLUR).contains(&self.blur) {
            issues.push(ValidationIssue::InvalidValue {
                section: "background",
                field: "blur",
                message: format!("must be within [0, {MAX_BLUR}], got {}", self.blur),
            });
        }

        if let Err(e) = SizeMode::from_str(&self.size_mode) {
            issues.push(ValidationIssue::InvalidValue {
                section: "background",
                field: "size_mode",
                message: e.to_string(),
            });
        }

        if let Err(e) = ThemeKind::from_str(&self.theme) {
            issues.push(ValidationIssue::InvalidValue {
                section: "background",
                field: "theme",
                message: e.to_string(),
            });
        }

        if matches!(&self.blend_mode, Some(mode) if mode.trim().is_empty()) {
            issues.push(ValidationIssue::InvalidValue {
                section: "background",
                field: "blend_mode",
                message: "must not be empty".to_string(),
            });
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        section: &'static str,
        field: &'static str,
    },
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },
    InvalidCombo {
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { section, field } => {
                write!(f, "[{section}] missing required field '{field}'")
            }
            ValidationIssue::InvalidValue {
                section,
                field,
                message,
            } => write!(f, "[{section}] invalid '{field}': {message}"),
            ValidationIssue::InvalidCombo { message } => {
                write!(f, "invalid configuration: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn test_all_issues_collected() {
        let mut config = FileConfig::default();
        config.engine.extension_id = String::new();
        config.engine.lock_retries = 0;
        config.background.blur = 150.0;
        config.background.size_mode = "covr".to_string();

        let err = config.validate().unwrap_err();
        assert_eq!(err.issues.len(), 4);
        let text = err.to_string();
        assert!(text.contains("extension_id"));
        assert!(text.contains("did you mean 'cover'"));
    }

    #[test]
    fn test_script_name_must_be_file_name() {
        let mut config = FileConfig::default();
        config.engine.script_name = "../escape.js".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.issues[0],
            ValidationIssue::InvalidValue {
                field: "script_name",
                ..
            }
        ));
    }

    #[test]
    fn test_identical_targets_rejected() {
        let mut config = FileConfig::default();
        config.engine.style_name = config.engine.script_name.clone();
        let err = config.validate().unwrap_err();
        assert!(matches!(err.issues[0], ValidationIssue::InvalidCombo { .. }));
    }
}
