//! Pluggable Kubernetes control-plane bootstrapping.
//!
//! Orchestration code picks a strategy by name at runtime and drives the
//! resulting [`Bootstrapper`] through a uniform lifecycle: initialize, wait
//! for readiness, join nodes, upgrade and tear down. Every host interaction
//! goes through a [`RemoteExecutor`], so the same code runs against SSH hosts
//! and simulated ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kubestrap::{registry, ClusterConfig, HostIdentity, SshExecutor, StrategyContext};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClusterConfig::builder("1.28.0").name("demo").build()?;
//!     let host = HostIdentity::new("cp-1", "192.168.49.2");
//!     let context = StrategyContext::new(Arc::new(SshExecutor::with_default_client(host)))
//!         .with_base_config(config.clone());
//!
//!     let bootstrapper = registry::select("kubeadm", context)?;
//!     bootstrapper.initialize_control_plane(&config).await?;
//!     bootstrapper
//!         .wait_until_ready(Duration::from_secs(300), &CancellationToken::new())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrapper;
pub mod config;
pub mod error;
pub mod exec;
pub mod kubeadm;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod settings;

pub use bootstrapper::{
    Bootstrapper, ClusterState, ClusterStatus, ConfigPaths, LogOptions, LogsBundle, ServiceState,
    TearDownReport, TearDownStep,
};
pub use config::{
    ClusterConfig, ClusterConfigBuilder, Component, ConfigError, ContainerRuntime, FeatureValue,
    KubernetesVersion, NetworkPlugin, NodeConfig, NodeRole,
};
pub use error::{BootstrapError, CommandFailure, ErrorKind, Result};
pub use exec::{CommandOutput, ExecError, HostIdentity, RemoteExecutor, SshClientKind, SshExecutor};
pub use kubeadm::KubeadmBootstrapper;
pub use registry::{StrategyContext, StrategyRegistry, StrategySettings};
pub use retry::RetryConfig;
pub use settings::{Settings, SettingsError};
