//! Remote command execution.
//!
//! Strategies never touch the host directly: every command and every file
//! transfer goes through a [`RemoteExecutor`], so a simulated host can stand
//! in for a real one.

mod ssh;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CommandFailure;

pub use ssh::{SshClientKind, SshExecutor};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Transport-level failures. A command that ran and exited non-zero is not
/// an `ExecError`; it is reported through [`CommandOutput::exit_code`].
#[derive(Error, Debug)]
pub enum ExecError {
    /// Could not reach the host.
    #[error("failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// Host rejected our credentials.
    #[error("authentication as {user} failed: {message}")]
    Auth { user: String, message: String },

    /// Local process or channel I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// libssh2 session error.
    #[error("SSH session error: {0}")]
    Session(#[from] ssh2::Error),

    /// Session ended without reporting an exit status.
    #[error("remote command terminated without exit status")]
    NoExitStatus,

    /// A file transfer could not be completed.
    #[error("failed to copy {local} to {remote}: {message}")]
    Copy {
        local: String,
        remote: String,
        message: String,
    },
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Identity of a host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    /// Name used in logs and errors (usually the machine name).
    pub name: String,
    /// IP address or resolvable hostname.
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key; the SSH agent is used when absent.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_user() -> String {
    "docker".to_string()
}

impl HostIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            user: default_user(),
            key_path: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    #[must_use]
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// `address:port` for socket connections.
    #[must_use]
    pub fn socket_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Runs commands and copies files on one host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Name of the host, for logs and error context.
    fn host(&self) -> &str;

    /// Run a shell command and capture its output.
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Copy a local file to `remote_path` with the octal `mode` (e.g. `"0644"`),
    /// creating parent directories as needed.
    async fn copy_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: &str,
    ) -> Result<(), ExecError>;
}

/// Run a command and treat a non-zero exit as failure.
///
/// # Errors
/// Returns [`CommandFailure`] carrying the command and captured output.
pub async fn run_checked(
    executor: &dyn RemoteExecutor,
    command: &str,
) -> Result<CommandOutput, CommandFailure> {
    tracing::debug!(host = executor.host(), command = %redact_secrets(command), "Running remote command");
    match executor.run(command).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(CommandFailure {
            host: executor.host().to_string(),
            command: redact_secrets(command),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: Some(output.exit_code),
            transport: None,
        }),
        Err(err) => Err(transport_failure(executor, command, err)),
    }
}

/// Run a probe whose exit status is the answer. Only transport failures are
/// errors.
///
/// # Errors
/// Returns [`CommandFailure`] if the command could not be run at all.
pub async fn probe(executor: &dyn RemoteExecutor, command: &str) -> Result<bool, CommandFailure> {
    tracing::debug!(host = executor.host(), command = %redact_secrets(command), "Probing");
    executor
        .run(command)
        .await
        .map(|output| output.success())
        .map_err(|err| transport_failure(executor, command, err))
}

/// Run a read-only command; return its stdout, or `None` on non-zero exit.
///
/// # Errors
/// Returns [`CommandFailure`] if the command could not be run at all.
pub async fn read_output(
    executor: &dyn RemoteExecutor,
    command: &str,
) -> Result<Option<String>, CommandFailure> {
    tracing::debug!(host = executor.host(), command = %redact_secrets(command), "Reading remote output");
    match executor.run(command).await {
        Ok(output) if output.success() => Ok(Some(output.stdout)),
        Ok(_) => Ok(None),
        Err(err) => Err(transport_failure(executor, command, err)),
    }
}

/// Copy a file, wrapping transport errors with the same context as commands.
///
/// # Errors
/// Returns [`CommandFailure`] describing the attempted transfer.
pub async fn copy_checked(
    executor: &dyn RemoteExecutor,
    local_path: &Path,
    remote_path: &str,
    mode: &str,
) -> Result<(), CommandFailure> {
    tracing::debug!(host = executor.host(), remote_path, mode, "Copying file");
    executor
        .copy_file(local_path, remote_path, mode)
        .await
        .map_err(|err| {
            transport_failure(
                executor,
                &format!("copy {} -> {remote_path}", local_path.display()),
                err,
            )
        })
}

fn transport_failure(executor: &dyn RemoteExecutor, command: &str, err: ExecError) -> CommandFailure {
    CommandFailure {
        host: executor.host().to_string(),
        command: redact_secrets(command),
        stdout: String::new(),
        stderr: String::new(),
        exit_code: None,
        transport: Some(err),
    }
}

/// Flags whose value is a cluster credential.
const SECRET_FLAGS: [&str; 2] = ["--token", "--certificate-key"];

const REDACTED: &str = "<redacted>";

/// Command text safe for logs and errors: values of credential flags are
/// replaced, in both `--flag value` and `--flag=value` form.
#[must_use]
pub fn redact_secrets(command: &str) -> String {
    let mut words = Vec::new();
    let mut hide_next = false;
    for word in command.split(' ') {
        if word.is_empty() {
            words.push(String::new());
        } else if hide_next {
            words.push(REDACTED.to_string());
            hide_next = false;
        } else if let Some(flag) = word
            .split_once('=')
            .map(|(flag, _)| flag)
            .filter(|flag| SECRET_FLAGS.contains(flag))
        {
            words.push(format!("{flag}={REDACTED}"));
        } else {
            hide_next = SECRET_FLAGS.contains(&word);
            words.push(word.to_string());
        }
    }
    words.join(" ")
}

/// Quote a string for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
