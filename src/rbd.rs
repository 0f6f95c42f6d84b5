//! Synchronous wrapper around the `rbd` binary.
//!
//! [`Rbd`] renders an [`RbdCommand`], runs it through a [`CommandRunner`]
//! and turns anything but a zero exit status into
//! [`RbdError::BackendCommandFailed`]. There are no retries: a failed
//! mutation fails the whole invocation.

use std::ffi::OsString;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::command::RbdCommand;
use crate::params::AuthCredentials;
use crate::runner::{CommandRunner, ProcessCommandRunner};

/// Default `rbd` binary name, resolved through `PATH`.
pub const DEFAULT_RBD_BIN: &str = "rbd";

/// Errors surfaced while talking to the `rbd` CLI.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RbdError {
    /// Raised when the binary cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when `rbd` exits with a non-zero status or is killed.
    #[error(
        "{command} exited with status {status_text} (stdout: {stdout:?}, stderr: {stderr:?})",
        command = render_command(.program, .args),
        status_text = status_text(.status)
    )]
    BackendCommandFailed {
        /// Program that was executed.
        program: String,
        /// Full argument vector, credentials included.
        args: Vec<OsString>,
        /// Exit code, `None` when terminated by a signal.
        status: Option<i32>,
        /// Trimmed standard output.
        stdout: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// Raised when `rbd showmapped` output is not valid JSON.
    #[error("failed to parse {program} showmapped output: {message}")]
    Parse {
        /// Program whose output was parsed.
        program: String,
        /// Parser error message.
        message: String,
    },
}

/// Renders a program and its arguments as a shell-quoted command line for
/// diagnostics. Nothing is ever executed through a shell.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = escape(program.into()).into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&escape(arg.to_string_lossy()));
    }
    rendered
}

fn status_text(status: &Option<i32>) -> String {
    status.map_or_else(|| String::from("unknown"), |code| code.to_string())
}

/// Runs `rbd` subcommands with a fixed binary and credential set.
#[derive(Clone, Debug)]
pub struct Rbd<R: CommandRunner> {
    program: String,
    auth: Option<AuthCredentials>,
    runner: R,
}

impl Rbd<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(
        program: impl Into<String>,
        auth: Option<AuthCredentials>,
    ) -> Self {
        Self::new(program, auth, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> Rbd<R> {
    /// Creates a wrapper using the provided runner.
    #[must_use]
    pub fn new(program: impl Into<String>, auth: Option<AuthCredentials>, runner: R) -> Self {
        Self {
            program: program.into(),
            auth,
            runner,
        }
    }

    /// Path or name of the `rbd` binary.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs `command` and returns its trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`RbdError::Spawn`] when the binary cannot be started and
    /// [`RbdError::BackendCommandFailed`] on any non-zero exit.
    pub fn exec(&self, command: &RbdCommand) -> Result<String, RbdError> {
        let args = command.to_args(self.auth.as_ref());
        debug!(command = %render_command(&self.program, &args), "running rbd");
        let output = self.runner.run(&self.program, &args)?;
        if output.is_success() {
            return Ok(output.stdout.trim().to_owned());
        }

        Err(RbdError::BackendCommandFailed {
            program: self.program.clone(),
            args,
            status: output.code,
            stdout: output.stdout.trim().to_owned(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}
