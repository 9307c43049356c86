//! Operator settings: an optional TOML file overlaid with `KUBESTRAP__*`
//! environment variables.
//!
//! ```toml
//! strategy = "kubeadm"
//! cluster_config = "cluster.yaml"
//! ssh_client = "external"
//!
//! [host]
//! name = "cp-1"
//! address = "192.168.49.2"
//! key_path = "/home/me/.ssh/id_ed25519"
//!
//! [readiness]
//! timeout_secs = 600
//! ```
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `KUBESTRAP__HOST__ADDRESS=192.168.49.2`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::{HostIdentity, SshClientKind, DEFAULT_SSH_PORT};
use crate::kubeadm;
use crate::registry::{StrategySettings, DEFAULT_BINARIES_DIR, DEFAULT_STAGING_DIR};
use crate::retry::RetryConfig;
use crate::runtime::{LogSettings, ProcessSettings};

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "kubestrap.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "KUBESTRAP";

/// Errors loading or validating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no host address configured (set host.address or KUBESTRAP__HOST__ADDRESS)")]
    MissingHost,

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// SSH target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Name used in logs; defaults to the address.
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            name: None,
            address: None,
            port: DEFAULT_SSH_PORT,
            user: "docker".to_string(),
            key_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_ms: 2_000,
        }
    }
}

/// Backoff for read-only probes, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: u64::try_from(config.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(config.max_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub binaries_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            binaries_dir: PathBuf::from(DEFAULT_BINARIES_DIR),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
        }
    }
}

/// Everything an operator can configure outside the cluster description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registered bootstrapper name.
    pub strategy: String,
    /// Path to the cluster configuration (YAML or JSON).
    pub cluster_config: Option<PathBuf>,
    pub host: HostSettings,
    pub ssh_client: SshClientKind,
    pub readiness: ReadinessSettings,
    pub retry: RetrySettings,
    pub paths: PathSettings,
    pub pull_images_before_init: bool,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: kubeadm::STRATEGY_NAME.to_string(),
            cluster_config: None,
            host: HostSettings::default(),
            ssh_client: SshClientKind::default(),
            readiness: ReadinessSettings::default(),
            retry: RetrySettings::default(),
            paths: PathSettings::default(),
            pull_images_before_init: false,
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; otherwise
    /// [`DEFAULT_SETTINGS_FILE`] is used when present. Environment variables
    /// win over the file.
    ///
    /// # Errors
    /// Returns [`SettingsError`] if a source fails to parse or a value is out
    /// of range.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_SETTINGS_FILE)).required(false),
        };

        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`SettingsError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |key, message: &str| {
            Err(SettingsError::Invalid {
                key,
                message: message.to_string(),
            })
        };

        if self.strategy.trim().is_empty() {
            return invalid("strategy", "must not be empty");
        }
        if self.readiness.timeout_secs == 0 {
            return invalid("readiness.timeout_secs", "must be positive");
        }
        if self.readiness.poll_interval_ms == 0 {
            return invalid("readiness.poll_interval_ms", "must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier", "must be a finite number of at least 1.0");
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.initial_delay_ms", "must not exceed retry.max_delay_ms");
        }
        if self.host.port == 0 {
            return invalid("host.port", "must be positive");
        }
        Ok(())
    }

    /// SSH identity of the control-plane host.
    ///
    /// # Errors
    /// Returns [`SettingsError::MissingHost`] if no address is configured.
    pub fn host_identity(&self) -> Result<HostIdentity, SettingsError> {
        let address = self
            .host
            .address
            .clone()
            .ok_or(SettingsError::MissingHost)?;
        let name = self.host.name.clone().unwrap_or_else(|| address.clone());

        let mut identity = HostIdentity::new(name, address)
            .with_port(self.host.port)
            .with_user(self.host.user.clone());
        if let Some(key) = &self.host.key_path {
            identity = identity.with_key(key.clone());
        }
        Ok(identity)
    }

    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness.timeout_secs)
    }

    /// Knobs handed to the strategy constructor.
    #[must_use]
    pub fn strategy_settings(&self) -> StrategySettings {
        StrategySettings {
            poll_interval: Duration::from_millis(self.readiness.poll_interval_ms),
            probe_retry: RetryConfig::from(&self.retry),
            binaries_dir: self.paths.binaries_dir.clone(),
            staging_dir: self.paths.staging_dir.clone(),
            pull_images_before_init: self.pull_images_before_init,
        }
    }

    /// Inputs for [`crate::runtime::init`].
    #[must_use]
    pub fn process_settings(&self) -> ProcessSettings {
        ProcessSettings {
            logging: self.log.clone(),
            ssh_client: self.ssh_client,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;
    use crate::runtime::LogFormat;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("KUBESTRAP__") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.strategy, "kubeadm");
        assert_eq!(settings.ssh_client, SshClientKind::Native);
        assert_eq!(settings.readiness_timeout(), Duration::from_secs(300));
        assert!(settings.validate().is_ok());

        let strategy = settings.strategy_settings();
        assert_eq!(strategy.poll_interval, Duration::from_secs(2));
        assert_eq!(strategy.probe_retry, RetryConfig::default());
        assert_eq!(strategy.binaries_dir, PathBuf::from(DEFAULT_BINARIES_DIR));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let file = write_settings(
            r#"
strategy = "kubeadm"
cluster_config = "cluster.yaml"
ssh_client = "external"
pull_images_before_init = true

[host]
name = "cp-1"
address = "192.168.49.2"
port = 2222

[readiness]
timeout_secs = 600
poll_interval_ms = 500

[log]
verbose = true
format = "json"
"#,
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.ssh_client, SshClientKind::External);
        assert_eq!(settings.cluster_config, Some(PathBuf::from("cluster.yaml")));
        assert_eq!(settings.readiness_timeout(), Duration::from_secs(600));
        assert!(settings.strategy_settings().pull_images_before_init);
        assert_eq!(settings.log.format, LogFormat::Json);

        let host = settings.host_identity().unwrap();
        assert_eq!(host.name, "cp-1");
        assert_eq!(host.port, 2222);
        assert_eq!(host.user, "docker");
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let file = write_settings("[host]\naddress = \"10.0.0.1\"\n");
        std::env::set_var("KUBESTRAP__HOST__ADDRESS", "10.0.0.9");
        std::env::set_var("KUBESTRAP__READINESS__TIMEOUT_SECS", "42");

        let settings = Settings::load(Some(file.path()));
        clear_env();

        let settings = settings.unwrap();
        assert_eq!(settings.host.address.as_deref(), Some("10.0.0.9"));
        assert_eq!(settings.readiness.timeout_secs, 42);
        // Unnamed hosts are named after their address.
        assert_eq!(settings.host_identity().unwrap().name, "10.0.0.9");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        clear_env();
        let err = Settings::load(Some(Path::new("/nonexistent/kubestrap.toml"))).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    #[test]
    fn test_missing_host_address() {
        let err = Settings::default().host_identity().unwrap_err();
        assert!(matches!(err, SettingsError::MissingHost));
    }

    #[test]
    fn test_validation_rejects_bad_retry() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));

        let mut settings = Settings::default();
        settings.retry.initial_delay_ms = 10_000;
        assert!(settings.validate().is_err());

        for multiplier in [0.5, f64::INFINITY, f64::NAN] {
            let mut settings = Settings::default();
            settings.retry.backoff_multiplier = multiplier;
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("retry.backoff_multiplier"), "{multiplier}");
        }
    }
}
