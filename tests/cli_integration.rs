//! Integration tests for the CLI
//!
//! Runs the built binary against a temp workbench directory for the
//! install, uninstall, status, render and locate commands

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const ORIGINAL: &str = "VAR x=1;\n";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    /// Workbench dir with a script asset, plus a config that keeps the lock
    /// inside the fixture.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let workbench = dir.path().join("resources/app/out/vs/workbench");
        fs::create_dir_all(&workbench).unwrap();
        fs::write(workbench.join("workbench.desktop.main.js"), ORIGINAL).unwrap();

        let config = format!(
            r#"[engine]
install_dir = "{}"
lock_dir = "{}"
lock_retries = 20

[background]
image = "https://example.com/bg.png"
opacity = 0.3
"#,
            toml_path(&workbench),
            toml_path(&dir.path().join("locks")),
        );
        fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn workbench(&self) -> PathBuf {
        self.dir.path().join("resources/app/out/vs/workbench")
    }

    fn script(&self) -> String {
        fs::read_to_string(self.workbench().join("workbench.desktop.main.js")).unwrap()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_background-patcher"))
            .arg("--config")
            .arg(self.dir.path().join("config.toml"))
            .arg("--state")
            .arg(self.dir.path().join("state.json"))
            .args(args)
            .env_remove("BACKGROUND_PATCHER_INSTALL_DIR")
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }
}

fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_background-patcher"))
        .arg("--help")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["install", "uninstall", "status", "render", "locate"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn test_install_then_uninstall() {
    let fx = Fixture::new();

    let output = fx.run(&["install", "--no-escalate"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("Installed"));
    assert!(stdout(&output).contains("captured"));

    let patched = fx.script();
    assert!(patched.starts_with(ORIGINAL));
    assert!(patched.contains("/*ext-backgroundCover-start*/"));
    assert!(patched.contains("opacity:0.3;"));
    assert!(patched.contains("url('https://example.com/bg.png')"));

    let state = fs::read_to_string(fx.dir.path().join("state.json")).unwrap();
    assert!(state.contains("imagePath"));

    let output = fx.run(&["uninstall", "--no-escalate"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(fx.script(), ORIGINAL);

    let state = fs::read_to_string(fx.dir.path().join("state.json")).unwrap();
    assert!(!state.contains("imagePath"));
}

#[test]
fn test_flags_override_config() {
    let fx = Fixture::new();
    let output = fx.run(&[
        "install",
        "--no-escalate",
        "--opacity",
        "0.6",
        "--blur",
        "12",
        "--size-mode",
        "repeat",
        "--theme",
        "light",
    ]);
    assert!(output.status.success(), "{output:?}");

    let patched = fx.script();
    assert!(patched.contains("opacity:0.6;"));
    assert!(patched.contains("filter: blur(12px);"));
    assert!(patched.contains("background-repeat: repeat;"));
    assert!(patched.contains("mix-blend-mode: multiply;"));
}

#[test]
fn test_install_with_diff() {
    let fx = Fixture::new();
    let output = fx.run(&["install", "--no-escalate", "--diff"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("(before)"));
    assert!(text.contains("/*ext-backgroundCover-start*/"));
}

#[test]
fn test_second_install_reports_up_to_date() {
    let fx = Fixture::new();
    assert!(fx.run(&["install", "--no-escalate"]).status.success());

    let output = fx.run(&["install", "--no-escalate"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("already up to date"));
}

#[test]
fn test_status_command() {
    let fx = Fixture::new();

    let output = fx.run(&["status"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("NOT INSTALLED"));

    assert!(fx.run(&["install", "--no-escalate"]).status.success());

    let output = fx.run(&["status"]);
    let text = stdout(&output);
    assert!(text.contains("INSTALLED"));
    assert!(!text.contains("NOT INSTALLED"));
    assert!(text.contains("Backup: present"));
    assert!(text.contains("Image: https://example.com/bg.png"));
}

#[test]
fn test_status_does_not_modify_files() {
    let fx = Fixture::new();
    assert!(fx.run(&["status"]).status.success());
    assert_eq!(fx.script(), ORIGINAL);
    assert!(!fx.workbench().join("workbench.desktop.main.js.bak").exists());
}

#[test]
fn test_missing_target_exits_nonzero() {
    let fx = Fixture::new();
    fs::remove_file(fx.workbench().join("workbench.desktop.main.js")).unwrap();

    let output = fx.run(&["install", "--no-escalate"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn test_invalid_blur_rejected_before_engine() {
    let fx = Fixture::new();
    let output = fx.run(&["install", "--no-escalate", "--blur", "150"]);
    assert!(!output.status.success());
    assert_eq!(fx.script(), ORIGINAL);
}

#[test]
fn test_render_prints_block_only() {
    let fx = Fixture::new();
    let output = fx.run(&["render", "--opacity", "0.95"]);
    assert!(output.status.success(), "{output:?}");

    let text = stdout(&output);
    assert!(text.starts_with("/*ext-backgroundCover-start*/"));
    assert!(text.trim_end().ends_with("/*ext-backgroundCover-end*/"));
    assert!(text.contains("opacity:0.8;"));
    assert_eq!(fx.script(), ORIGINAL);
}

#[test]
fn test_locate_finds_workbench() {
    let fx = Fixture::new();
    let output = fx.run(&["locate", fx.dir.path().to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("workbench"));

    let empty = TempDir::new().unwrap();
    let output = fx.run(&["locate", empty.path().to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_background-patcher"))
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("status")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope.toml"));
    assert!(stderr.contains("does not exist"));
}
