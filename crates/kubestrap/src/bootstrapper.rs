//! The lifecycle contract every bootstrap strategy implements.
//!
//! Orchestration code only ever sees `Box<dyn Bootstrapper>`; which
//! strategy sits behind it is decided by [`crate::registry`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{ClusterConfig, KubernetesVersion, NodeConfig};
use crate::error::{BootstrapError, Result};
use crate::exec::{read_output, RemoteExecutor};

/// Lifecycle phase of a cluster, as derived from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// No control-plane artifacts on the host.
    Uninitialized,
    /// Artifacts present but the control plane is not healthy yet.
    Initializing,
    /// Control plane healthy and all components on one version.
    Ready,
    /// Components report different versions.
    Upgrading,
    /// Control-plane state removed by tear-down.
    Destroyed,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Upgrading => write!(f, "upgrading"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Observed state of one host-level service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    Stopped,
    /// Probe returned something unexpected; the text is kept.
    Error(String),
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Error(detail) => write!(f, "Error: {detail}"),
        }
    }
}

/// Point-in-time cluster status.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub state: ClusterState,
    pub apiserver: ServiceState,
    pub kubelet: ServiceState,
    /// Version reported per component, when known.
    pub components: BTreeMap<String, String>,
}

/// Where a strategy keeps its artifacts on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigPaths {
    /// Generated bootstrap configuration.
    pub bootstrap_config: String,
    /// Kubelet systemd drop-in.
    pub kubelet_unit: String,
    /// Pod network configuration.
    pub network_config: String,
    /// Cluster-admin kubeconfig.
    pub admin_kubeconfig: String,
    /// Static pod manifests.
    pub manifests_dir: String,
    /// Certificate bundle.
    pub pki_dir: String,
}

/// Options for [`Bootstrapper::log_commands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Lines of history per source.
    pub lines: u32,
    /// Keep streaming.
    pub follow: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            lines: 60,
            follow: false,
        }
    }
}

/// Shell commands that print diagnostic logs, keyed by source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogsBundle {
    pub commands: BTreeMap<String, String>,
}

impl LogsBundle {
    /// Run every command and gather the output. Sources that fail are
    /// reported inline; this never fails as a whole.
    pub async fn collect(&self, executor: &dyn RemoteExecutor) -> BTreeMap<String, String> {
        let mut logs = BTreeMap::new();
        for (source, command) in &self.commands {
            let text = match read_output(executor, command).await {
                Ok(Some(stdout)) => stdout,
                Ok(None) => format!("command failed: {command}"),
                Err(failure) => format!("unavailable: {failure}"),
            };
            logs.insert(source.clone(), text);
        }
        logs
    }
}

/// Outcome of one tear-down step.
#[derive(Debug)]
pub struct TearDownStep {
    pub name: String,
    pub result: Result<()>,
}

/// Aggregate outcome of [`Bootstrapper::tear_down`].
#[derive(Debug)]
pub struct TearDownReport {
    pub steps: Vec<TearDownStep>,
    pub finished_at: DateTime<Utc>,
}

impl TearDownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.result.is_ok())
    }

    /// Steps that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &BootstrapError)> {
        self.steps
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|e| (s.name.as_str(), e)))
    }

    /// Names of failed steps.
    #[must_use]
    pub fn failed_steps(&self) -> Vec<&str> {
        self.failures().map(|(name, _)| name).collect()
    }

    /// Resulting cluster state: destroyed when clean, otherwise unknown
    /// enough that the caller should query [`Bootstrapper::status`].
    #[must_use]
    pub fn state(&self) -> Option<ClusterState> {
        self.is_clean().then_some(ClusterState::Destroyed)
    }
}

impl fmt::Display for TearDownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match &step.result {
                Ok(()) => writeln!(f, "  ok      {}", step.name)?,
                Err(e) => writeln!(f, "  failed  {}: {e}", step.name)?,
            }
        }
        Ok(())
    }
}

/// Uniform control-plane lifecycle.
///
/// A handle is bound to one host for its lifetime and is driven by a single
/// owner; implementations need no internal locking.
#[async_trait]
pub trait Bootstrapper: Send + Sync + fmt::Debug {
    /// Registered strategy name.
    fn name(&self) -> &'static str;

    /// Kubernetes versions this strategy can install, as `(min, max_exclusive)`.
    fn supported_versions(&self) -> (KubernetesVersion, KubernetesVersion);

    /// Bring up the control plane. Safe to repeat against a host where an
    /// earlier attempt partially or fully succeeded.
    async fn initialize_control_plane(&self, config: &ClusterConfig) -> Result<()>;

    /// Poll host-local health until ready, `timeout` elapses, or `cancel` fires.
    async fn wait_until_ready(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()>;

    /// Join another node. `node_executor` reaches that node.
    async fn join_node(&self, node: &NodeConfig, node_executor: &dyn RemoteExecutor) -> Result<()>;

    /// Move the control plane to `target`, skipping components already there.
    async fn upgrade(&self, target: &KubernetesVersion, cancel: &CancellationToken) -> Result<()>;

    /// Best-effort removal of control-plane state. Never fails.
    async fn tear_down(&self) -> TearDownReport;

    /// Current status derived from the host. Read-only.
    async fn status(&self) -> Result<ClusterStatus>;

    /// Pre-pull control-plane images for `config`.
    async fn pull_images(&self, config: &ClusterConfig) -> Result<()>;

    /// Artifact locations on the host.
    fn config_paths(&self) -> ConfigPaths;

    /// Commands that print diagnostic logs. Nothing is executed.
    fn log_commands(&self, options: LogOptions) -> LogsBundle;
}
