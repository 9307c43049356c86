//! Strategy selection by name.
//!
//! The registry is a plain name → constructor table. It never caches
//! handles and holds no mutable state, so any number of cluster sessions
//! can select concurrently.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bootstrapper::Bootstrapper;
use crate::config::ClusterConfig;
use crate::error::{BootstrapError, Result};
use crate::exec::RemoteExecutor;
use crate::kubeadm::{self, KubeadmBootstrapper};
use crate::retry::RetryConfig;

/// Default directory holding versioned Kubernetes binaries on the host.
pub const DEFAULT_BINARIES_DIR: &str = "/var/lib/kubestrap/binaries";

/// Default directory for generated configuration on the host.
pub const DEFAULT_STAGING_DIR: &str = "/var/tmp/kubestrap";

/// Knobs shared by all strategies.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    /// Interval between readiness polls.
    pub poll_interval: Duration,
    /// Backoff for transient failures of read-only probes.
    pub probe_retry: RetryConfig,
    /// Host directory with one `v<version>/` subdirectory per release.
    pub binaries_dir: PathBuf,
    /// Host directory for generated configuration.
    pub staging_dir: PathBuf,
    /// Pull control-plane images before initializing.
    pub pull_images_before_init: bool,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            probe_retry: RetryConfig::default(),
            binaries_dir: PathBuf::from(DEFAULT_BINARIES_DIR),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            pull_images_before_init: false,
        }
    }
}

/// Everything a strategy constructor receives.
#[derive(Clone)]
pub struct StrategyContext {
    /// Executor for the control-plane host.
    pub executor: Arc<dyn RemoteExecutor>,
    /// Configuration remembered for operations that take none (upgrade).
    pub base_config: Option<ClusterConfig>,
    pub settings: StrategySettings,
}

impl StrategyContext {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            base_config: None,
            settings: StrategySettings::default(),
        }
    }

    #[must_use]
    pub fn with_base_config(mut self, config: ClusterConfig) -> Self {
        self.base_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StrategySettings) -> Self {
        self.settings = settings;
        self
    }
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("host", &self.executor.host())
            .field("base_config", &self.base_config.as_ref().map(ClusterConfig::name))
            .field("settings", &self.settings)
            .finish()
    }
}

/// Builds a handle from a context.
pub type Constructor = fn(StrategyContext) -> Result<Box<dyn Bootstrapper>>;

/// Name → constructor table.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    entries: Vec<(&'static str, Constructor)>,
}

static BUILTIN: LazyLock<StrategyRegistry> = LazyLock::new(|| StrategyRegistry {
    entries: vec![(kubeadm::STRATEGY_NAME, KubeadmBootstrapper::construct)],
});

impl StrategyRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the strategies shipped with this crate.
    #[must_use]
    pub fn builtin() -> &'static StrategyRegistry {
        &BUILTIN
    }

    /// Add a strategy.
    ///
    /// # Errors
    /// Returns a configuration error if `name` is empty or already taken.
    pub fn register(mut self, name: &'static str, constructor: Constructor) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(BootstrapError::config("strategy name cannot be empty"));
        }
        if self.contains(name) {
            return Err(BootstrapError::config_at(
                "strategy already registered",
                name,
            ));
        }
        debug!(strategy = name, "Registering bootstrapper");
        self.entries.push((name, constructor));
        Ok(self)
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Check a name up front, before any cluster work starts.
    ///
    /// # Errors
    /// Returns [`BootstrapError::UnknownStrategy`] for unregistered names.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(self.unknown(name))
        }
    }

    /// Construct a fresh handle for `name`. The registry keeps no reference
    /// to it.
    ///
    /// # Errors
    /// Returns [`BootstrapError::UnknownStrategy`] for unregistered names, or
    /// whatever the strategy's constructor reports.
    pub fn select(&self, name: &str, context: StrategyContext) -> Result<Box<dyn Bootstrapper>> {
        let Some((_, constructor)) = self.entries.iter().find(|(n, _)| *n == name) else {
            error!(strategy = name, "No bootstrapper registered under this name");
            return Err(self.unknown(name));
        };

        let handle = constructor(context)?;
        info!(strategy = name, "Bootstrapper selected");
        Ok(handle)
    }

    fn unknown(&self, name: &str) -> BootstrapError {
        BootstrapError::UnknownStrategy {
            requested: name.to_string(),
            available: self.names().into_iter().map(String::from).collect(),
        }
    }
}

/// Select from the built-in registry.
///
/// # Errors
/// See [`StrategyRegistry::select`].
pub fn select(name: &str, context: StrategyContext) -> Result<Box<dyn Bootstrapper>> {
    StrategyRegistry::builtin().select(name, context)
}
