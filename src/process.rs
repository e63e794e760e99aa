//! Subprocess helpers.
//!
//! [`Cmd`] is a small builder over [`std::process::Command`] that turns a
//! non-zero exit status into an error carrying the program name and the
//! tail of its stderr, so every external tool (bootstrapper, installers,
//! 7-Zip, pip) fails the same way.

use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

/// Number of stderr lines kept in a [`ProcessError`].
const STDERR_TAIL_LINES: usize = 20;

/// A subprocess ran but did not succeed.
#[derive(Debug, Error)]
#[error("{}{}", summary(.message.as_deref(), .program, .status), stderr_block(.stderr))]
pub struct ProcessError {
    pub program: String,
    pub status: ExitStatus,
    pub message: Option<String>,
    pub stderr: String,
}

fn summary(message: Option<&str>, program: &str, status: &ExitStatus) -> String {
    match message {
        Some(msg) => format!("{} ({} exited with {})", msg, program, status),
        None => format!("{} exited with {}", program, status),
    }
}

fn stderr_block(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{}", stderr)
    }
}

/// Captured output of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builder for an external command.
#[derive(Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Message prefixed to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the result instead of an error on non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(&self.program)
            .to_string_lossy()
            .into_owned()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run with captured output.
    pub fn run(self) -> Result<CommandResult> {
        debug!(program = %self.program_name(), args = ?self.args, "running");
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {}", self.program.to_string_lossy()))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.allow_fail {
            return Err(ProcessError {
                program: self.program_name(),
                status: result.status,
                message: self.error_msg,
                stderr: stderr_tail(&result.stderr),
            }
            .into());
        }
        Ok(result)
    }

    /// Run with inherited stdio (installers that print progress).
    pub fn run_interactive(self) -> Result<()> {
        debug!(program = %self.program_name(), args = ?self.args, "running (interactive)");
        let status = self
            .command()
            .status()
            .with_context(|| format!("failed to spawn {}", self.program.to_string_lossy()))?;

        if !status.success() && !self.allow_fail {
            return Err(ProcessError {
                program: self.program_name(),
                status,
                message: self.error_msg,
                stderr: String::new(),
            }
            .into());
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_run_captures_stdout() {
        let result = Cmd::new("sh").args(["-c", "echo hello"]).run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_is_process_error() {
        let err = Cmd::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .error_msg("tool failed")
            .run()
            .unwrap_err();
        let process = err.downcast_ref::<ProcessError>().unwrap();
        assert_eq!(process.status.code(), Some(3));
        assert_eq!(process.stderr, "boom");
        assert!(err.to_string().starts_with("tool failed (sh exited with"));
        assert!(err.to_string().ends_with("\nboom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_allow_fail_returns_result() {
        let result = Cmd::new("sh").args(["-c", "exit 1"]).allow_fail().run().unwrap();
        assert!(!result.success());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line{}\n", i)).collect();
        let tail = stderr_tail(&text);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line29"));
    }

    #[cfg(unix)]
    #[test]
    fn test_error_without_message_or_stderr() {
        let err = Cmd::new("sh").args(["-c", "exit 2"]).run().unwrap_err();
        let process = err.downcast_ref::<ProcessError>().unwrap();
        assert_eq!(process.program, "sh");
        assert!(process.message.is_none());
        assert_eq!(process.to_string(), format!("sh exited with {}", process.status));
    }
}
