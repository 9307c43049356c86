//! Error taxonomy shared by every bootstrap strategy.
//!
//! Callers match on [`BootstrapError::kind`] instead of parsing messages.

use std::time::Duration;

use thiserror::Error;

use crate::exec::ExecError;

/// Result alias used across the crate.
pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

/// Coarse classification of a [`BootstrapError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested strategy name is not registered.
    UnknownStrategy,
    /// Cluster configuration is invalid or unsupported.
    Configuration,
    /// Host is missing something the strategy needs (e.g. binaries).
    Provisioning,
    /// Transport failure or non-zero remote exit.
    RemoteExecution,
    /// Readiness wait exceeded its deadline.
    ReadinessTimeout,
    /// Node could not join the cluster.
    Join,
    /// Upgrade precondition not met.
    Upgrade,
    /// Operation stopped by the caller's cancellation signal.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownStrategy => write!(f, "unknown_strategy"),
            Self::Configuration => write!(f, "configuration"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::RemoteExecution => write!(f, "remote_execution"),
            Self::ReadinessTimeout => write!(f, "readiness_timeout"),
            Self::Join => write!(f, "join"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Details of a failed remote command.
#[derive(Debug)]
pub struct CommandFailure {
    /// Host the command ran on.
    pub host: String,
    /// The command line as sent to the executor.
    pub command: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status, `None` when the transport failed before one was known.
    pub exit_code: Option<i32>,
    /// Transport error, if that is what failed.
    pub transport: Option<ExecError>,
}

impl CommandFailure {
    /// Transport failures are worth retrying for read-only probes; a
    /// command that ran and exited non-zero is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transport.is_some()
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.transport, self.exit_code) {
            (Some(err), _) => write!(f, "`{}` on {}: {err}", self.command, self.host),
            (None, code) => {
                write!(f, "`{}` on {} exited with ", self.command, self.host)?;
                match code {
                    Some(code) => write!(f, "status {code}")?,
                    None => write!(f, "no status")?,
                }
                let stderr = self.stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

/// Errors surfaced by bootstrapper lifecycle operations.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Strategy name not present in the registry.
    #[error("unknown bootstrapper: {requested} (available: {})", .available.join(", "))]
    UnknownStrategy {
        requested: String,
        available: Vec<String>,
    },

    /// Invalid or unsupported cluster configuration.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        /// The offending piece of configuration, when there is one.
        fragment: Option<String>,
    },

    /// Host lacks prerequisites for the strategy.
    #[error("provisioning failure on {host}: {message}")]
    Provisioning { host: String, message: String },

    /// A remote command could not run or exited non-zero.
    #[error("remote execution failed: {0}")]
    RemoteExecution(Box<CommandFailure>),

    /// Control plane did not become ready in time.
    #[error("{host} not ready after {}s (last status: {last_status})", .waited.as_secs())]
    ReadinessTimeout {
        host: String,
        waited: Duration,
        last_status: String,
    },

    /// Node join failed.
    #[error("failed to join node {node}: {message}")]
    Join {
        node: String,
        message: String,
        #[source]
        source: Option<Box<BootstrapError>>,
    },

    /// Upgrade is not possible from the current state.
    #[error("cannot upgrade from {from} to {to}: {message}")]
    Upgrade {
        from: String,
        to: String,
        message: String,
    },

    /// Operation aborted by the caller.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl BootstrapError {
    /// Classification tag for matching.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStrategy { .. } => ErrorKind::UnknownStrategy,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Provisioning { .. } => ErrorKind::Provisioning,
            Self::RemoteExecution(_) => ErrorKind::RemoteExecution,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::Join { .. } => ErrorKind::Join,
            Self::Upgrade { .. } => ErrorKind::Upgrade,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Configuration error without a specific fragment.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            fragment: None,
        }
    }

    /// Configuration error pointing at the offending value.
    pub fn config_at(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Cancellation outcome for the named operation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether retrying the same call could succeed without caller changes.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RemoteExecution(failure) => failure.is_transient(),
            _ => false,
        }
    }

    /// The failed command, for remote execution errors.
    #[must_use]
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::RemoteExecution(failure) => Some(failure),
            Self::Join {
                source: Some(inner),
                ..
            } => inner.command_failure(),
            _ => None,
        }
    }
}

impl From<CommandFailure> for BootstrapError {
    fn from(failure: CommandFailure) -> Self {
        Self::RemoteExecution(Box::new(failure))
    }
}

impl From<crate::config::ConfigError> for BootstrapError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
