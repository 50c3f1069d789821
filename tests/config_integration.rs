//! Integration tests for the TOML config
//!
//! Tests parsing, validation, and resolution into engine settings

use background_patcher::config::{
    load_from_path, load_from_str, BackgroundOverrides, ConfigError, ConfigOrigin, ResolveError,
    ValidationIssue,
};
use background_patcher::{MemoryStore, NoopEscalator, PatchEngine, SizeMode};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[engine]
extension_id = "myExt"
script_name = "main.js"
style_name = "main.css"
backup_suffix = ".orig"
lock_retries = 4
lock_retry_wait_ms = 25
legacy_clear_cap = 2
host_file_urls = false

[background]
image = "https://example.com/bg.png"
opacity = 0.4
blur = 3
size_mode = "noop_right_bottom"
theme = "light"
"#;

#[test]
fn test_full_config_parses() {
    let config = load_from_str(FULL_CONFIG).unwrap();
    assert_eq!(config.engine.extension_id, "myExt");
    assert_eq!(config.engine.lock_retries, 4);
    assert_eq!(config.engine.legacy_clear_cap, 2);

    let spec = config
        .background
        .to_spec(&BackgroundOverrides::default())
        .unwrap();
    assert_eq!(spec.size_mode(), SizeMode::NoopBottomRight);
    assert_eq!(spec.blur(), 3.0);
    assert_eq!(spec.blend_mode().as_str(), "multiply");
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = load_from_str("").unwrap();
    assert_eq!(config.engine.extension_id, "backgroundCover");
    assert_eq!(config.engine.script_name, "workbench.desktop.main.js");
    assert_eq!(config.engine.style_name, "workbench.desktop.main.css");
    assert_eq!(config.engine.backup_suffix, ".bak");
    assert_eq!(config.engine.lock_retries, 10);
    assert_eq!(config.engine.lock_retry_wait_ms, 100);
    assert_eq!(config.engine.legacy_clear_cap, 5);
    assert!(config.engine.host_file_urls);
    assert_eq!(config.background.size_mode, "cover");
}

#[test]
fn test_unknown_key_rejected() {
    let err = load_from_str("[background]\nopactiy = 0.3\n").unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Toml {
            origin: ConfigOrigin::Inline,
            ..
        }
    ));
}

#[test]
fn test_validation_reports_every_issue() {
    let input = r#"
[engine]
lock_retries = 0

[background]
opacity = -1
blur = 101
size_mode = "contian"
theme = "sepia"
"#;
    let err = load_from_str(input).unwrap_err();
    let ConfigError::Validation { source, .. } = &err else {
        panic!("expected validation error, got {err}");
    };
    assert_eq!(source.issues.len(), 5);
    assert!(source.issues.iter().all(|issue| matches!(
        issue,
        ValidationIssue::InvalidValue { .. }
    )));
    assert!(err.to_string().contains("did you mean 'contain'"));
}

#[test]
fn test_errors_carry_file_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[background]\nblur = 500\n").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Validation {
            origin: ConfigOrigin::Explicit(_),
            ..
        }
    ));
    assert!(err.to_string().contains("config.toml"));
    assert!(err.to_string().contains("blur"));

    let missing = load_from_path(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(missing, ConfigError::NotFound { .. }));
    assert!(missing.to_string().contains("nope.toml"));
}

#[test]
fn test_engine_config_resolution() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.js"), "VAR x=1;").unwrap();

    let config = load_from_str(FULL_CONFIG).unwrap();
    let engine_config = config.engine.to_engine_config(Some(dir.path())).unwrap();
    let root = dir.path().canonicalize().unwrap();

    assert_eq!(engine_config.script_path, root.join("main.js"));
    assert_eq!(engine_config.style_path, root.join("main.css"));
    assert_eq!(engine_config.backup_path, root.join("main.js.orig"));
    assert_eq!(engine_config.markers.start(), "/*ext-myExt-start*/");
    assert_eq!(engine_config.lock_retries, 4);
    assert_eq!(engine_config.lock_retry_wait, Duration::from_millis(25));
}

#[test]
fn test_config_drives_engine() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.js"), "VAR x=1;").unwrap();

    let config = load_from_str(FULL_CONFIG).unwrap();
    let mut engine_config = config.engine.to_engine_config(Some(dir.path())).unwrap();
    engine_config.lock_dir = dir.path().join("locks");
    let spec = config
        .background
        .to_spec(&BackgroundOverrides::default())
        .unwrap();

    let mut engine = PatchEngine::new(engine_config.clone(), MemoryStore::new(), NoopEscalator::default());
    engine.install(&spec).unwrap();

    let content = fs::read_to_string(&engine_config.script_path).unwrap();
    assert!(content.starts_with("VAR x=1;/*ext-myExt-start*/"));
    assert!(content.contains("background-position: right 96%;"));
    assert!(content.contains("url('https://example.com/bg.png')"));
    assert_eq!(
        fs::read_to_string(&engine_config.backup_path).unwrap(),
        "VAR x=1;"
    );
}

#[test]
#[cfg(unix)]
fn test_symlinked_script_outside_install_dir_rejected() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    fs::create_dir(&install).unwrap();
    let outside = dir.path().join("elsewhere.js");
    fs::write(&outside, "x").unwrap();
    symlink(&outside, install.join("workbench.desktop.main.js")).unwrap();

    let config = load_from_str("").unwrap();
    let result = config.engine.to_engine_config(Some(&install));
    assert!(matches!(result, Err(ResolveError::Guard(_))));
}
