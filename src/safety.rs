use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boundary checks that keep every asset the engine touches inside the
/// host's install directory.
#[derive(Debug, Clone)]
pub struct InstallGuard {
    /// Canonical install directory
    install_root: PathBuf,
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Path is outside the install directory: {path} (install dir: {root})")]
    OutsideInstallDir { path: PathBuf, root: PathBuf },

    #[error("Path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("Failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InstallGuard {
    /// Create a guard rooted at `install_root`, which must exist.
    pub fn new(install_root: impl AsRef<Path>) -> Result<Self, GuardError> {
        let install_root = canonicalize(install_root.as_ref())?;
        Ok(Self { install_root })
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Resolve `path` (relative paths against the install root) and check it
    /// stays inside the root after symlinks are followed.
    ///
    /// The file itself may not exist yet; its parent directory must.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, GuardError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.install_root.join(path)
        };

        let canonical = if absolute.exists() {
            canonicalize(&absolute)?
        } else {
            let name = absolute
                .file_name()
                .ok_or_else(|| GuardError::NoFileName(absolute.clone()))?;
            let parent = absolute.parent().unwrap_or(Path::new("/"));
            canonicalize(parent)?.join(name)
        };

        if !canonical.starts_with(&self.install_root) {
            return Err(GuardError::OutsideInstallDir {
                path: canonical,
                root: self.install_root.clone(),
            });
        }
        Ok(canonical)
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, GuardError> {
    path.canonicalize().map_err(|source| GuardError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_path_inside_install_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let guard = InstallGuard::new(root).unwrap();

        let file = root.join("out/workbench.js");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"").unwrap();

        assert!(guard.validate_path(&file).is_ok());
    }

    #[test]
    fn test_validate_missing_file_with_existing_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = InstallGuard::new(temp_dir.path()).unwrap();

        let resolved = guard.validate_path("workbench.js.bak").unwrap();
        assert_eq!(resolved, guard.install_root().join("workbench.js.bak"));
    }

    #[test]
    fn test_validate_path_outside_install_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("app");
        fs::create_dir_all(&root).unwrap();
        let guard = InstallGuard::new(&root).unwrap();

        let outside = temp_dir.path().join("outside.js");
        fs::write(&outside, b"").unwrap();

        let result = guard.validate_path(&outside);
        assert!(matches!(result, Err(GuardError::OutsideInstallDir { .. })));
    }

    #[test]
    fn test_dot_dot_escape_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("app");
        fs::create_dir_all(&root).unwrap();
        let guard = InstallGuard::new(&root).unwrap();

        let result = guard.validate_path("../stolen.js");
        assert!(matches!(result, Err(GuardError::OutsideInstallDir { .. })));
    }

    #[test]
    fn test_missing_root_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = InstallGuard::new(temp_dir.path().join("nope"));
        assert!(matches!(result, Err(GuardError::Canonicalize { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("app");
        fs::create_dir_all(&root).unwrap();

        let outside = temp_dir.path().join("outside.js");
        fs::write(&outside, b"").unwrap();

        let link = root.join("workbench.js");
        symlink(&outside, &link).unwrap();

        let guard = InstallGuard::new(&root).unwrap();
        let result = guard.validate_path(&link);
        assert!(matches!(result, Err(GuardError::OutsideInstallDir { .. })));
    }
}
