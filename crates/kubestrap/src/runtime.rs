//! Process-wide setup, performed once before any cluster work.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::exec::SshClientKind;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static DEFAULT_SSH_CLIENT: RwLock<Option<SshClientKind>> = RwLock::new(None);

/// Errors from [`init`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InitError {
    #[error("process already initialized")]
    AlreadyInitialized,

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Debug output for this crate, info for dependencies.
    pub verbose: bool,
    pub format: LogFormat,
}

impl LogSettings {
    /// Filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "info,kubestrap=debug"
        } else {
            "warn,kubestrap=info"
        }
    }
}

/// Everything [`init`] configures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSettings {
    pub logging: LogSettings,
    pub ssh_client: SshClientKind,
}

/// Install logging and the default SSH transport. Call once per process.
///
/// # Errors
/// Returns [`InitError::AlreadyInitialized`] on a second call, or
/// [`InitError::Logging`] if another log subscriber is already installed.
pub fn init(settings: &ProcessSettings) -> Result<(), InitError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(InitError::AlreadyInitialized);
    }
    if let Err(e) = install_logging(&settings.logging) {
        INITIALIZED.store(false, Ordering::SeqCst);
        return Err(e);
    }
    store_ssh_client(settings.ssh_client);
    debug!(ssh_client = %settings.ssh_client, "Process initialized");
    Ok(())
}

/// Record the default SSH transport without touching logging.
///
/// # Errors
/// Returns [`InitError::AlreadyInitialized`] if a default was already set.
pub fn set_default_ssh_client(kind: SshClientKind) -> Result<(), InitError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(InitError::AlreadyInitialized);
    }
    store_ssh_client(kind);
    Ok(())
}

fn store_ssh_client(kind: SshClientKind) {
    let mut slot = DEFAULT_SSH_CLIENT
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *slot = Some(kind);
}

fn install_logging(settings: &LogSettings) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| InitError::Logging(e.to_string()))
}

/// Transport used by [`SshExecutor::with_default_client`](crate::exec::SshExecutor::with_default_client).
/// Native until [`init`] says otherwise.
#[must_use]
pub fn default_ssh_client() -> SshClientKind {
    DEFAULT_SSH_CLIENT
        .read()
        .map(|slot| (*slot).unwrap_or_default())
        .unwrap_or_default()
}

/// Whether [`init`] or [`set_default_ssh_client`] has run.
#[must_use]
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// Forget the process-wide choices. Test support; the installed log
/// subscriber stays in place.
pub fn reset() {
    let mut slot = DEFAULT_SSH_CLIENT
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *slot = None;
    INITIALIZED.store(false, Ordering::SeqCst);
}
