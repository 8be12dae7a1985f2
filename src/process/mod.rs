//! Process supervision for external collaborators.
//!
//! Every command runs through `sh -c` with a `PATH` built from the
//! supervisor's resolved tool directories followed by the inherited `PATH`.
//! The parent environment is never modified.
//!
//! Two modes exist:
//! - [`Supervisor::run`] runs a short command to completion and captures
//!   its output.
//! - [`Supervisor::spawn`] starts a long-running command on a pseudo-terminal
//!   or plain pipes and hands back an [`OutputSource`] for incremental reads.

pub mod stream;

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, error};

pub use stream::{Channel, OutputEvent, OutputSource};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{command}' in '{}'", .cwd.display())]
    Spawn {
        command: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with status {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("pseudo-terminal setup failed for '{command}': {message}")]
    Pty { command: String, message: String },

    #[error("failed to wait on '{command}'")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tool search path")]
    SearchPath(#[from] env::JoinPathsError),
}

/// Captured result of a command run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout with trailing whitespace removed.
    pub stdout: String,
    /// Stderr with trailing whitespace removed.
    pub stderr: String,
    /// Exit code, `-1` when the child was terminated by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands with an explicit tool search path.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    tool_dirs: Vec<PathBuf>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `dir` ahead of the inherited `PATH` for every child.
    pub fn with_tool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tool_dirs.push(dir.into());
        self
    }

    /// `PATH` value handed to children.
    pub fn search_path(&self) -> Result<OsString, ProcessError> {
        let inherited = env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .tool_dirs
            .iter()
            .cloned()
            .chain(env::split_paths(&inherited));
        Ok(env::join_paths(dirs)?)
    }

    /// Run `command_line` to completion in `cwd`.
    ///
    /// With `fail_on_non_zero`, a non-zero exit is logged and returned as
    /// [`ProcessError::NonZeroExit`]; otherwise the caller inspects
    /// [`CommandOutput::exit_code`].
    pub fn run(
        &self,
        command_line: &str,
        cwd: &Path,
        fail_on_non_zero: bool,
    ) -> Result<CommandOutput, ProcessError> {
        debug!(command = command_line, cwd = %cwd.display(), "running command");

        let output = self
            .shell(command_line, cwd)?
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProcessError::Spawn {
                command: command_line.to_string(),
                cwd: cwd.to_path_buf(),
                source,
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout)
                .trim_end()
                .to_string(),
            stderr: String::from_utf8_lossy(&output.stderr)
                .trim_end()
                .to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if fail_on_non_zero && !result.success() {
            error!(
                command = command_line,
                code = result.exit_code,
                stderr = %result.stderr,
                "command failed"
            );
            return Err(ProcessError::NonZeroExit {
                command: command_line.to_string(),
                code: result.exit_code,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }

    /// Start `command_line` in `cwd` and stream its output.
    pub fn spawn(
        &self,
        command_line: &str,
        cwd: &Path,
        channel: Channel,
    ) -> Result<Box<dyn OutputSource>, ProcessError> {
        debug!(
            command = command_line,
            cwd = %cwd.display(),
            ?channel,
            "spawning streaming command"
        );
        match channel {
            Channel::Pipes => stream::spawn_piped(self.shell(command_line, cwd)?, command_line),
            Channel::Pty => stream::spawn_pty(command_line, cwd, &self.search_path()?),
        }
    }

    fn shell(&self, command_line: &str, cwd: &Path) -> Result<Command, ProcessError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command_line)
            .current_dir(cwd)
            .env("PATH", self.search_path()?);
        Ok(cmd)
    }
}

/// Quote `value` as a single shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
