//! Elevated-privilege command execution.
//!
//! Only used after a plain write has failed with a permission error. The
//! engine asks an [`Escalator`] to run a small, platform-specific command
//! set through the OS's interactive consent prompt, then retries the write
//! once. The prompt may block for as long as the user takes to answer;
//! dismissing it surfaces as [`EscalationError::Cancelled`].

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("elevation prompt was dismissed")]
    Cancelled,

    #[error("privilege escalation is unavailable: {0}")]
    Unavailable(String),

    #[error("elevated command `{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start elevation helper: {0}")]
    Spawn(#[from] io::Error),
}

/// Operating system family, as far as escalation is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Commands that make an existing file writable by the current user.
    pub fn grant_write_commands(self, path: &Path) -> Vec<PlatformCommand> {
        let target = path.display().to_string();
        let grant = format!("{}:F", windows_user());
        match self {
            Platform::Windows => vec![
                PlatformCommand::new("takeown", ["/f", target.as_str(), "/a"]),
                PlatformCommand::new("icacls", [target.as_str(), "/grant", grant.as_str()]),
            ],
            Platform::MacOs => vec![PlatformCommand::new("chmod", ["a+rwx", target.as_str()])],
            Platform::Linux => vec![PlatformCommand::new("chmod", ["666", target.as_str()])],
        }
    }

    /// Commands that create `path` (empty) and make it writable.
    pub fn create_writable_commands(self, path: &Path) -> Vec<PlatformCommand> {
        let target = path.display().to_string();
        let grant = format!("{}:F", windows_user());
        match self {
            Platform::Windows => vec![
                PlatformCommand::new("fsutil", ["file", "createnew", target.as_str(), "0"]),
                PlatformCommand::new("icacls", [target.as_str(), "/grant", grant.as_str()]),
            ],
            Platform::MacOs => vec![
                PlatformCommand::new("touch", [target.as_str()]),
                PlatformCommand::new("chmod", ["a+rwx", target.as_str()]),
            ],
            Platform::Linux => vec![
                PlatformCommand::new("touch", [target.as_str()]),
                PlatformCommand::new("chmod", ["666", target.as_str()]),
            ],
        }
    }
}

fn windows_user() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "Users".to_string())
}

/// One opaque external command to run with elevated rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCommand {
    program: String,
    args: Vec<String>,
}

impl PlatformCommand {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(|a| a.as_ref().to_string()).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// POSIX `sh` rendering with single-quoted arguments.
    pub fn to_sh(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(sh_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `cmd.exe` rendering with double-quoted arguments.
    pub fn to_cmd(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(cmd_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PlatformCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sh())
    }
}

fn sh_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn cmd_quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '"', '&', '|', '<', '>', '^']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\"\""))
}

/// Capability to run commands with elevated rights.
///
/// One implementation per OS family lives in [`SystemEscalator`]; tests
/// substitute scripted fakes or [`NoopEscalator`].
pub trait Escalator {
    fn platform(&self) -> Platform;

    /// Run one command with elevated rights, returning its stdout.
    fn elevate_and_run(&self, command: &PlatformCommand) -> Result<String, EscalationError>;

    /// Run a command set, stopping at the first failure.
    fn elevate_and_run_all(&self, commands: &[PlatformCommand]) -> Result<String, EscalationError> {
        let mut stdout = String::new();
        for command in commands {
            stdout.push_str(&self.elevate_and_run(command)?);
        }
        Ok(stdout)
    }

    fn grant_write_access(&self, path: &Path) -> Result<(), EscalationError> {
        self.elevate_and_run_all(&self.platform().grant_write_commands(path))
            .map(|_| ())
    }

    fn create_writable(&self, path: &Path) -> Result<(), EscalationError> {
        self.elevate_and_run_all(&self.platform().create_writable_commands(path))
            .map(|_| ())
    }
}

impl<T: Escalator + ?Sized> Escalator for &T {
    fn platform(&self) -> Platform {
        (**self).platform()
    }

    fn elevate_and_run(&self, command: &PlatformCommand) -> Result<String, EscalationError> {
        (**self).elevate_and_run(command)
    }

    fn elevate_and_run_all(&self, commands: &[PlatformCommand]) -> Result<String, EscalationError> {
        (**self).elevate_and_run_all(commands)
    }
}

/// Escalator that refuses every request.
#[derive(Debug, Clone, Copy)]
pub struct NoopEscalator {
    platform: Platform,
}

impl Default for NoopEscalator {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
        }
    }
}

impl Escalator for NoopEscalator {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn elevate_and_run(&self, _command: &PlatformCommand) -> Result<String, EscalationError> {
        Err(EscalationError::Unavailable(
            "escalation is disabled".to_string(),
        ))
    }
}

/// Runs commands through the platform's interactive consent prompt:
/// `pkexec` on Linux, `osascript` on macOS, an elevated PowerShell
/// `Start-Process` on Windows. A command set is joined into one script so
/// the user is prompted once.
#[derive(Debug, Clone, Copy)]
pub struct SystemEscalator {
    platform: Platform,
}

impl Default for SystemEscalator {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl SystemEscalator {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Helper invocation that runs `script` elevated.
    fn prompt_command(&self, script: &str) -> Result<Command, EscalationError> {
        match self.platform {
            Platform::Linux => {
                let pkexec = which::which("pkexec").map_err(|_| {
                    EscalationError::Unavailable("pkexec not found on PATH".to_string())
                })?;
                let mut cmd = Command::new(pkexec);
                cmd.args(["sh", "-c", script]);
                Ok(cmd)
            }
            Platform::MacOs => {
                let escaped = script.replace('\\', "\\\\").replace('"', "\\\"");
                let mut cmd = Command::new("osascript");
                cmd.args([
                    "-e",
                    &format!("do shell script \"{escaped}\" with administrator privileges"),
                ]);
                Ok(cmd)
            }
            Platform::Windows => {
                let escaped = script.replace('\'', "''");
                let mut cmd = Command::new("powershell");
                cmd.args([
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    &format!(
                        "$p = Start-Process -FilePath cmd -ArgumentList '/c {escaped}' -Verb RunAs -Wait -PassThru -WindowStyle Hidden; exit $p.ExitCode"
                    ),
                ]);
                Ok(cmd)
            }
        }
    }

    fn script_for(&self, commands: &[PlatformCommand]) -> String {
        match self.platform {
            Platform::Windows => commands
                .iter()
                .map(PlatformCommand::to_cmd)
                .collect::<Vec<_>>()
                .join(" && "),
            Platform::MacOs | Platform::Linux => commands
                .iter()
                .map(PlatformCommand::to_sh)
                .collect::<Vec<_>>()
                .join(" && "),
        }
    }

    fn check_output(&self, script: &str, output: Output) -> Result<String, EscalationError> {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() && stderr.is_empty() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        if is_cancellation(self.platform, output.status.code(), &stderr) {
            return Err(EscalationError::Cancelled);
        }
        Err(EscalationError::CommandFailed {
            command: script.to_string(),
            code: output.status.code(),
            stderr,
        })
    }
}

/// Whether a failed prompt means the user declined rather than a command
/// failing.
fn is_cancellation(platform: Platform, code: Option<i32>, stderr: &str) -> bool {
    match platform {
        // pkexec: 126 when the dialog is dismissed or authorization denied.
        Platform::Linux => code == Some(126),
        // osascript: errAEUserCanceled.
        Platform::MacOs => stderr.contains("(-128)") || stderr.contains("User canceled"),
        Platform::Windows => stderr.contains("canceled by the user"),
    }
}

impl Escalator for SystemEscalator {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn elevate_and_run(&self, command: &PlatformCommand) -> Result<String, EscalationError> {
        self.elevate_and_run_all(std::slice::from_ref(command))
    }

    fn elevate_and_run_all(&self, commands: &[PlatformCommand]) -> Result<String, EscalationError> {
        if commands.is_empty() {
            return Ok(String::new());
        }
        let script = self.script_for(commands);
        info!(platform = ?self.platform, %script, "requesting elevated privileges");
        let output = self.prompt_command(&script)?.output()?;
        let result = self.check_output(&script, output);
        debug!(ok = result.is_ok(), "elevation finished");
        result
    }
}
