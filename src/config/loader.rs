use crate::config::schema::{FileConfig, ValidationError};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where a [`FileConfig`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Named on the command line.
    Explicit(PathBuf),
    /// Found at [`default_config_path`].
    DefaultFile(PathBuf),
    /// Parsed from an in-memory string.
    Inline,
    /// No config file; every value is a default.
    BuiltIn,
}

impl ConfigOrigin {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigOrigin::Explicit(path) | ConfigOrigin::DefaultFile(path) => Some(path),
            ConfigOrigin::Inline | ConfigOrigin::BuiltIn => None,
        }
    }
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Explicit(path) => write!(f, "config {}", path.display()),
            ConfigOrigin::DefaultFile(path) => write!(f, "default config {}", path.display()),
            ConfigOrigin::Inline => f.write_str("inline config"),
            ConfigOrigin::BuiltIn => f.write_str("built-in defaults"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A config file was asked for by name and is not there.
    #[error("config file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {origin}: {source}")]
    Io {
        origin: ConfigOrigin,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {origin}{}: {source}", in_section(.section))]
    Toml {
        origin: ConfigOrigin,
        /// Table the parser was in when it failed, if it got that far.
        section: Option<String>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid {origin}: {source}")]
    Validation {
        origin: ConfigOrigin,
        #[source]
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn origin(&self) -> Option<&ConfigOrigin> {
        match self {
            ConfigError::NotFound { .. } => None,
            ConfigError::Io { origin, .. }
            | ConfigError::Toml { origin, .. }
            | ConfigError::Validation { origin, .. } => Some(origin),
        }
    }
}

fn in_section(section: &Option<String>) -> String {
    section
        .as_deref()
        .map(|name| format!(" in [{name}]"))
        .unwrap_or_default()
}

/// A parsed config and where it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: FileConfig,
    pub origin: ConfigOrigin,
}

/// Parse and validate a TOML config. Missing sections take their defaults.
pub fn load_from_str(input: &str) -> Result<FileConfig, ConfigError> {
    parse(input, ConfigOrigin::Inline)
}

/// Load a config file the caller named; a missing file is
/// [`ConfigError::NotFound`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
    let path = path.as_ref();
    read_file(ConfigOrigin::Explicit(path.to_path_buf()), path)
}

/// `~/.background-patcher/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".background-patcher").join("config.toml"))
}

/// Load `explicit` if given, else the default config file when present,
/// else the built-in defaults. Only an explicit path may be missing with an
/// error.
pub fn load_or_default(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let origin = match explicit {
        Some(path) => ConfigOrigin::Explicit(path.to_path_buf()),
        None => match default_config_path() {
            Some(path) if path.is_file() => ConfigOrigin::DefaultFile(path),
            _ => ConfigOrigin::BuiltIn,
        },
    };
    let config = match origin.path() {
        Some(path) => read_file(origin.clone(), path)?,
        None => FileConfig::default(),
    };
    Ok(LoadedConfig { config, origin })
}

fn read_file(origin: ConfigOrigin, path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => return Err(ConfigError::Io { origin, source }),
    };
    parse(&contents, origin)
}

fn parse(input: &str, origin: ConfigOrigin) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = match toml_edit::de::from_str(input) {
        Ok(config) => config,
        Err(source) => {
            let section = source
                .span()
                .and_then(|span| section_at(input, span.start));
            return Err(ConfigError::Toml {
                origin,
                section,
                source,
            });
        }
    };
    config
        .validate()
        .map_err(|source| ConfigError::Validation { origin, source })?;
    Ok(config)
}

/// Name of the last `[table]` header starting before `offset`.
fn section_at(input: &str, offset: usize) -> Option<String> {
    let mut section = None;
    let mut line_start = 0;
    for line in input.split_inclusive('\n') {
        if line_start > offset {
            break;
        }
        let header = line.trim();
        if let Some(name) = header.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            section = Some(name.trim().to_string());
        }
        line_start += line.len();
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_at_offset() {
        let input = "[engine]\nlock_retries = 1\n\n[background]\nopacity = 0.2\n";
        assert_eq!(section_at(input, 10).as_deref(), Some("engine"));
        assert_eq!(section_at(input, input.len() - 3).as_deref(), Some("background"));
        assert_eq!(section_at("opacity = 1\n", 2), None);
    }

    #[test]
    fn test_syntax_error_names_section() {
        let err = load_from_str("[engine]\nlock_retries = 3\n\n[background]\nopacity = = 1\n")
            .unwrap_err();
        let ConfigError::Toml { origin, section, .. } = &err else {
            panic!("expected TOML error, got {err}");
        };
        assert_eq!(origin, &ConfigOrigin::Inline);
        assert_eq!(section.as_deref(), Some("background"));
        assert!(err.to_string().contains("in [background]"));
    }

    #[test]
    fn test_missing_explicit_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = load_or_default(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { path: ref p } if p == &path));
        assert!(err.origin().is_none());
    }

    #[test]
    fn test_explicit_file_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[background]\nopacity = 0.4\n").unwrap();

        let loaded = load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.origin, ConfigOrigin::Explicit(path.clone()));
        assert_eq!(loaded.origin.path(), Some(path.as_path()));
        assert_eq!(loaded.config.background.opacity, 0.4);
    }
}
