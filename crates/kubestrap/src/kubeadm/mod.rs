//! kubeadm-driven control plane.
//!
//! Every step inspects the host before mutating it, so each operation can be
//! re-run after a partial failure:
//!
//! - init reuses a control plane whose staged configuration is unchanged,
//!   regenerates state in place when it changed, and resets leftovers of an
//!   interrupted install before starting over
//! - upgrade only touches components not already on the target version
//! - tear-down attempts every step and reports each outcome

mod join;
pub mod paths;
pub mod templates;
pub mod versions;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::join::JoinCredentials;
use self::paths::Layout;
use self::templates::{KubeletUnit, Templates};
use crate::bootstrapper::{
    Bootstrapper, ClusterState, ClusterStatus, ConfigPaths, LogOptions, LogsBundle,
    ServiceState, TearDownReport, TearDownStep,
};
use crate::config::{
    ClusterConfig, ContainerRuntime, KubernetesVersion, NetworkPlugin, NodeConfig, NodeRole,
    DEFAULT_API_SERVER_PORT,
};
use crate::error::{BootstrapError, Result};
use crate::exec::{copy_checked, probe, read_output, run_checked, shell_quote, RemoteExecutor};
use crate::registry::{StrategyContext, StrategySettings};
use crate::retry::retry_transient;

/// Registered name of this strategy.
pub const STRATEGY_NAME: &str = "kubeadm";

const CONTROL_PLANE_BINARIES: [&str; 3] = ["kubeadm", "kubelet", "kubectl"];
const NODE_BINARIES: [&str; 2] = ["kubeadm", "kubelet"];

/// One round of readiness probes.
#[derive(Debug, Clone, Default)]
struct Readiness {
    healthz: Option<String>,
    kubelet: Option<String>,
}

impl Readiness {
    fn apiserver_ok(&self) -> bool {
        self.healthz.as_deref().map(str::trim) == Some("ok")
    }

    fn kubelet_ok(&self) -> bool {
        self.kubelet.as_deref().map(str::trim) == Some("active")
    }

    fn is_ready(&self) -> bool {
        self.apiserver_ok() && self.kubelet_ok()
    }

    fn describe(&self) -> String {
        let apiserver = match self.healthz.as_deref().map(str::trim) {
            Some("ok") => "apiserver healthy".to_string(),
            Some(body) if !body.is_empty() => format!("apiserver unhealthy: {body}"),
            _ => "apiserver unreachable".to_string(),
        };
        let kubelet = if self.kubelet_ok() {
            "kubelet active"
        } else {
            "kubelet not active"
        };
        format!("{apiserver}, {kubelet}")
    }
}

/// Bootstraps a control plane with `kubeadm` on a single host.
pub struct KubeadmBootstrapper {
    executor: Arc<dyn RemoteExecutor>,
    base_config: Option<ClusterConfig>,
    settings: StrategySettings,
    layout: Layout,
    templates: Templates,
}

impl fmt::Debug for KubeadmBootstrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeadmBootstrapper")
            .field("host", &self.executor.host())
            .field("base_config", &self.base_config.as_ref().map(ClusterConfig::name))
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl KubeadmBootstrapper {
    /// Build a handle bound to the context's host.
    ///
    /// # Errors
    /// Returns a configuration error if the base configuration targets a
    /// version this strategy does not support.
    pub fn new(context: StrategyContext) -> Result<Self> {
        if let Some(config) = &context.base_config {
            versions::ensure_supported(config.kubernetes_version())?;
        }
        let layout = Layout::new(
            &context.settings.binaries_dir,
            &context.settings.staging_dir,
        );
        Ok(Self {
            executor: context.executor,
            base_config: context.base_config,
            settings: context.settings,
            layout,
            templates: Templates::new()?,
        })
    }

    /// Registry constructor.
    ///
    /// # Errors
    /// See [`KubeadmBootstrapper::new`].
    pub fn construct(context: StrategyContext) -> Result<Box<dyn Bootstrapper>> {
        Ok(Box::new(Self::new(context)?))
    }

    fn exec(&self) -> &dyn RemoteExecutor {
        self.executor.as_ref()
    }

    fn api_server_port(&self) -> u16 {
        self.base_config
            .as_ref()
            .map_or(DEFAULT_API_SERVER_PORT, |c| c.networking().api_server_port)
    }

    fn runtime(&self) -> ContainerRuntime {
        self.base_config
            .as_ref()
            .map_or_else(ContainerRuntime::default, ClusterConfig::container_runtime)
    }

    async fn check_binaries(
        &self,
        executor: &dyn RemoteExecutor,
        version: &KubernetesVersion,
        binaries: &[&str],
    ) -> Result<()> {
        let mut missing = Vec::new();
        for binary in binaries {
            if !probe(executor, &self.layout.has_binary(version, binary)).await? {
                missing.push(*binary);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(BootstrapError::Provisioning {
            host: executor.host().to_string(),
            message: format!(
                "missing {} for {version} in {}",
                missing.join(", "),
                self.layout.bin_dir(version)
            ),
        })
    }

    /// Write `contents` to `remote_path` on the host through a local
    /// temporary file.
    async fn install(
        &self,
        executor: &dyn RemoteExecutor,
        contents: &str,
        remote_path: &str,
        mode: &str,
    ) -> Result<()> {
        let stage_error = |e: std::io::Error| BootstrapError::Provisioning {
            host: executor.host().to_string(),
            message: format!("could not stage {remote_path} locally: {e}"),
        };
        let mut file = tempfile::NamedTempFile::new().map_err(stage_error)?;
        file.write_all(contents.as_bytes()).map_err(stage_error)?;
        file.flush().map_err(stage_error)?;

        copy_checked(executor, file.path(), remote_path, mode).await?;
        debug!(host = executor.host(), path = remote_path, "Installed file");
        Ok(())
    }

    /// Install kubelet units for `unit` and reload systemd.
    async fn install_kubelet(&self, executor: &dyn RemoteExecutor, unit: &KubeletUnit<'_>) -> Result<()> {
        self.install(
            executor,
            &self.templates.kubelet_service()?,
            paths::KUBELET_SERVICE,
            "0644",
        )
        .await?;
        self.install(
            executor,
            &self.templates.kubelet_dropin(unit)?,
            paths::KUBELET_DROPIN,
            "0644",
        )
        .await?;
        run_checked(executor, &paths::systemctl("daemon-reload")).await?;
        Ok(())
    }

    /// Stage everything the control-plane host needs for `config`.
    async fn install_control_plane_files(&self, config: &ClusterConfig, rendered: &str) -> Result<()> {
        let exec = self.exec();
        let version = config.kubernetes_version();
        let (node_name, node_ip) = control_plane_identity(config);

        let unit = KubeletUnit {
            bin_dir: self.layout.bin_dir(version),
            node_name,
            node_ip,
            runtime: config.container_runtime(),
        };
        self.install_kubelet(exec, &unit).await?;

        if config.network_plugin() == NetworkPlugin::Bridge {
            let conflist = templates::bridge_conflist(&config.networking().pod_subnet)?;
            self.install(exec, &conflist, paths::CNI_CONFIG, "0644").await?;
        }

        self.install(exec, rendered, &self.layout.kubeadm_config(), "0640")
            .await
    }

    /// Fail unless init left a usable credential bundle behind.
    async fn verify_credentials(&self) -> Result<()> {
        let exec = self.exec();
        for path in [paths::CA_CERT, paths::ADMIN_CONF] {
            if !probe(exec, &paths::file_not_empty(path)).await? {
                return Err(BootstrapError::Provisioning {
                    host: exec.host().to_string(),
                    message: format!("{path} is missing after init"),
                });
            }
        }
        Ok(())
    }

    async fn static_pod_version(&self, component: &str) -> Result<Option<KubernetesVersion>> {
        let output = read_output(self.exec(), &paths::manifest_image(component)).await?;
        Ok(output.as_deref().and_then(versions::parse_image_version))
    }

    async fn apiserver_version(&self) -> Result<Option<KubernetesVersion>> {
        self.static_pod_version("kube-apiserver").await
    }

    /// Version of each component that reports one. Static pods report via
    /// their image tags, the kubelet via the binary its unit runs.
    async fn component_versions(&self) -> Result<BTreeMap<String, KubernetesVersion>> {
        let mut found = BTreeMap::new();
        for component in paths::VERSIONED_STATIC_PODS {
            if let Some(version) = self.static_pod_version(component).await? {
                found.insert(component.to_string(), version);
            }
        }
        let unit = read_output(self.exec(), &paths::cat(paths::KUBELET_DROPIN)).await?;
        if let Some(version) = unit.as_deref().and_then(versions::parse_kubelet_version) {
            found.insert("kubelet".to_string(), version);
        }
        Ok(found)
    }

    async fn readiness(&self) -> Result<Readiness> {
        let exec = self.exec();
        Ok(Readiness {
            healthz: read_output(exec, &paths::healthz(self.api_server_port())).await?,
            kubelet: read_output(exec, &paths::kubelet_active()).await?,
        })
    }

    async fn join_credentials(
        &self,
        version: &KubernetesVersion,
        node: &NodeConfig,
    ) -> Result<JoinCredentials> {
        let exec = self.exec();
        let output = run_checked(exec, &self.layout.create_join_command(version)).await?;
        let credentials = JoinCredentials::parse(&output.stdout).ok_or_else(|| BootstrapError::Join {
            node: node.name.clone(),
            message: "could not parse join command from kubeadm output".to_string(),
            source: None,
        })?;

        if node.role != NodeRole::ControlPlane {
            return Ok(credentials);
        }

        let output = run_checked(exec, &self.layout.upload_certs(version)).await?;
        let key = join::parse_certificate_key(&output.stdout).ok_or_else(|| BootstrapError::Join {
            node: node.name.clone(),
            message: "kubeadm did not print a certificate key".to_string(),
            source: None,
        })?;
        Ok(credentials.with_certificate_key(key))
    }

    /// Staged configuration recording what the cluster runs after moving to
    /// `target`, or `None` when the staged copy is already current.
    ///
    /// Upgrades only change the version. When the staged copy still matches
    /// the base configuration it is re-rendered for `target`; otherwise only
    /// its version line changes so settings that were never applied are not
    /// recorded as applied.
    fn restaged_config(&self, staged: &str, target: &KubernetesVersion) -> Result<Option<String>> {
        let Some(applied) = versions::parse_config_version(staged) else {
            warn!(host = self.exec().host(), "Staged kubeadm configuration has no version, leaving it");
            return Ok(None);
        };
        if applied == *target {
            if let Some(base) = &self.base_config {
                if self.templates.kubeadm_config(&base.with_version(target.clone()))? != staged {
                    warn!(
                        host = self.exec().host(),
                        "Base configuration differs from the applied one; run init to apply it"
                    );
                }
            }
            return Ok(None);
        }

        if let Some(base) = &self.base_config {
            let at_applied = self.templates.kubeadm_config(&base.with_version(applied))?;
            if at_applied == staged {
                let next = base.with_version(target.clone());
                return Ok(Some(self.templates.kubeadm_config(&next)?));
            }
        }
        Ok(versions::with_config_version(staged, target))
    }

    async fn reset_step(&self) -> Result<()> {
        let version = match self.apiserver_version().await {
            Ok(Some(version)) => version,
            Ok(None) => {
                debug!(host = self.exec().host(), "No control plane found; nothing to reset");
                return Ok(());
            }
            Err(e) => match &self.base_config {
                Some(config) => config.kubernetes_version().clone(),
                None => return Err(e),
            },
        };
        run_checked(self.exec(), &self.layout.reset(&version)).await?;
        Ok(())
    }
}

/// Name and address the control-plane kubelet registers with.
fn control_plane_identity(config: &ClusterConfig) -> (&str, Option<&str>) {
    config.primary_control_plane().map_or((config.name(), None), |node| {
        (node.name.as_str(), node.address.as_deref())
    })
}

fn ensure_live(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(BootstrapError::cancelled(operation))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Bootstrapper for KubeadmBootstrapper {
    fn name(&self) -> &'static str {
        STRATEGY_NAME
    }

    fn supported_versions(&self) -> (KubernetesVersion, KubernetesVersion) {
        versions::supported_range()
    }

    async fn initialize_control_plane(&self, config: &ClusterConfig) -> Result<()> {
        let version = config.kubernetes_version();
        versions::ensure_supported(version)?;

        let exec = self.exec();
        let host = exec.host();
        info!(
            "Initializing control plane {} ({version}) on {host}...",
            config.name()
        );

        self.check_binaries(exec, version, &CONTROL_PLANE_BINARIES).await?;
        let rendered = self.templates.kubeadm_config(config)?;

        let has_admin = probe(exec, &paths::file_exists(paths::ADMIN_CONF)).await?;
        if has_admin {
            if let Some(running) = self.apiserver_version().await? {
                if running != *version {
                    return Err(BootstrapError::config_at(
                        format!("control plane on {host} already runs {running}; use upgrade to change versions"),
                        version.as_str(),
                    ));
                }
            }

            let staged = read_output(exec, &paths::cat(&self.layout.kubeadm_config())).await?;
            if staged.as_deref() == Some(rendered.as_str()) {
                info!("Control plane on {host} already matches the requested configuration");
                run_checked(exec, &paths::systemctl("start kubelet")).await?;
            } else {
                info!("Configuration changed, regenerating control-plane state on {host}...");
                self.install_control_plane_files(config, &rendered).await?;
                for phase in self.layout.reconfigure_phases(version) {
                    run_checked(exec, &phase).await?;
                }
            }
            self.verify_credentials().await?;
            info!("✅ Control plane ready for readiness checks on {host}");
            return Ok(());
        }

        if probe(exec, &paths::file_exists(&paths::manifest("kube-apiserver"))).await? {
            warn!(host, "Found control-plane manifests without admin credentials, resetting");
            run_checked(exec, &self.layout.reset(version)).await?;
        }

        if self.settings.pull_images_before_init {
            self.pull_images(config).await?;
        }

        self.install_control_plane_files(config, &rendered).await?;
        run_checked(exec, &paths::systemctl("enable kubelet")).await?;
        run_checked(exec, &self.layout.init(version)).await?;
        self.verify_credentials().await?;

        info!("✅ Control plane initialized on {host}");
        Ok(())
    }

    async fn wait_until_ready(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let host = self.exec().host();
        let deadline = Instant::now() + timeout;
        let mut last_status = "not probed yet".to_string();

        info!("Waiting up to {}s for control plane on {host}...", timeout.as_secs());

        loop {
            ensure_live(cancel, "wait for readiness")?;

            // Retries of one round must not outlive the overall deadline.
            let round = tokio::time::timeout_at(
                deadline,
                retry_transient(&self.settings.probe_retry, "readiness probe", cancel, || {
                    self.readiness()
                }),
            )
            .await;

            match round {
                Ok(Ok(readiness)) if readiness.is_ready() => {
                    info!("✅ Control plane on {host} is ready");
                    return Ok(());
                }
                Ok(Ok(readiness)) => last_status = readiness.describe(),
                Ok(Err(e)) if e.kind() == crate::error::ErrorKind::Cancelled => return Err(e),
                Ok(Err(e)) => last_status = format!("probe failed: {e}"),
                Err(_) => {
                    last_status =
                        format!("readiness check still retrying at deadline (last: {last_status})");
                }
            }
            debug!(host, status = %last_status, "Control plane not ready");

            let now = Instant::now();
            if now >= deadline {
                return Err(BootstrapError::ReadinessTimeout {
                    host: host.to_string(),
                    waited: timeout,
                    last_status,
                });
            }

            let pause = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(BootstrapError::cancelled("wait for readiness"));
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn join_node(&self, node: &NodeConfig, node_executor: &dyn RemoteExecutor) -> Result<()> {
        let join_error = |message: &str, source: Option<BootstrapError>| BootstrapError::Join {
            node: node.name.clone(),
            message: message.to_string(),
            source: source.map(Box::new),
        };

        let version = self
            .apiserver_version()
            .await?
            .ok_or_else(|| join_error("control plane is not initialized", None))?;
        info!("Joining {} node {} ({version})...", node.role, node.name);

        self.check_binaries(node_executor, &version, &NODE_BINARIES).await?;

        if probe(node_executor, &paths::file_exists(paths::KUBELET_CONF)).await? {
            let lookup = self
                .layout
                .kubectl(&version, &format!("get node {}", shell_quote(&node.name)));
            if probe(self.exec(), &lookup).await? {
                info!("Node {} already joined, skipping", node.name);
                return Ok(());
            }
            warn!(node = %node.name, "Stale kubelet credentials on node, resetting before join");
            run_checked(node_executor, &self.layout.reset(&version)).await?;
        }

        let runtime = self.runtime();
        let unit = KubeletUnit {
            bin_dir: self.layout.bin_dir(&version),
            node_name: &node.name,
            node_ip: node.address.as_deref(),
            runtime,
        };
        self.install_kubelet(node_executor, &unit).await?;
        run_checked(node_executor, &paths::systemctl("enable kubelet")).await?;

        let credentials = self
            .join_credentials(&version, node)
            .await
            .map_err(|e| join_error("could not create join credentials", Some(e)))?;
        let command = credentials.command(&self.layout, &version, node, runtime);

        match run_checked(node_executor, &command).await {
            Ok(_) => {}
            Err(failure) if join::is_credential_rejection(&failure) => {
                warn!(node = %node.name, "Join credentials rejected, issuing new ones");
                let fresh = self
                    .join_credentials(&version, node)
                    .await
                    .map_err(|e| join_error("could not regenerate join credentials", Some(e)))?;
                run_checked(
                    node_executor,
                    &fresh.command(&self.layout, &version, node, runtime),
                )
                .await
                .map_err(|f| join_error("join rejected again with new credentials", Some(f.into())))?;
            }
            Err(failure) => return Err(join_error("kubeadm join failed", Some(failure.into()))),
        }

        info!("✅ Node {} joined", node.name);
        Ok(())
    }

    async fn upgrade(&self, target: &KubernetesVersion, cancel: &CancellationToken) -> Result<()> {
        versions::ensure_supported(target)?;
        ensure_live(cancel, "upgrade")?;

        let exec = self.exec();
        let host = exec.host();
        let refuse = |message: &str| BootstrapError::Upgrade {
            from: "unknown".to_string(),
            to: target.to_string(),
            message: message.to_string(),
        };

        if !probe(exec, &paths::file_exists(paths::ADMIN_CONF)).await? {
            return Err(refuse("control plane is not initialized"));
        }

        let installed = self.component_versions().await?;
        let (Some(oldest), Some(newest)) = (installed.values().min(), installed.values().max())
        else {
            return Err(refuse("could not determine running component versions"));
        };
        versions::check_upgrade(oldest, newest, target)?;

        let pending_pods: Vec<&str> = paths::VERSIONED_STATIC_PODS
            .into_iter()
            .filter(|c| installed.get(*c) != Some(target))
            .collect();
        let kubelet_active = read_output(exec, &paths::kubelet_active())
            .await?
            .is_some_and(|state| state.trim() == "active");
        let pending_kubelet = installed.get("kubelet") != Some(target) || !kubelet_active;

        let staged = read_output(exec, &paths::cat(&self.layout.kubeadm_config())).await?;
        let restage = match staged.as_deref() {
            Some(staged) => self.restaged_config(staged, target)?,
            None => None,
        };

        if pending_pods.is_empty() && !pending_kubelet && restage.is_none() {
            info!("Control plane on {host} already at {target}");
            return Ok(());
        }

        info!("Upgrading control plane on {host} from {oldest} to {target}...");
        self.check_binaries(exec, target, &CONTROL_PLANE_BINARIES).await?;

        if !pending_pods.is_empty() {
            ensure_live(cancel, "upgrade")?;
            info!("Upgrading {}...", pending_pods.join(", "));
            run_checked(exec, &self.layout.upgrade_apply(target)).await?;
        }

        if pending_kubelet {
            ensure_live(cancel, "upgrade")?;
            info!("Upgrading kubelet to {target}...");
            let (node_name, node_ip) = self
                .base_config
                .as_ref()
                .map_or((exec.host(), None), control_plane_identity);
            let unit = KubeletUnit {
                bin_dir: self.layout.bin_dir(target),
                node_name,
                node_ip,
                runtime: self.runtime(),
            };
            self.install_kubelet(exec, &unit).await?;
            run_checked(exec, &paths::systemctl("restart kubelet")).await?;
        }

        if let Some(rendered) = restage {
            ensure_live(cancel, "upgrade")?;
            self.install(exec, &rendered, &self.layout.kubeadm_config(), "0640")
                .await?;
        }

        info!("✅ Control plane on {host} upgraded to {target}");
        Ok(())
    }

    async fn tear_down(&self) -> TearDownReport {
        let exec = self.exec();
        info!("Tearing down control plane on {}...", exec.host());

        let mut steps = vec![TearDownStep {
            name: "kubeadm reset".to_string(),
            result: self.reset_step().await,
        }];

        let staged = [self.layout.kubeadm_config(), self.layout.images_config()];
        let commands = [
            ("stop kubelet", paths::systemctl("stop kubelet")),
            ("disable kubelet", paths::systemctl("disable kubelet")),
            ("remove kubernetes state", paths::remove(&[paths::KUBERNETES_DIR])),
            ("remove etcd data", paths::remove(&[paths::ETCD_DATA_DIR])),
            ("remove network config", paths::remove(&[paths::CNI_CONFIG])),
            (
                "remove kubelet units",
                paths::remove(&[paths::KUBELET_DROPIN, paths::KUBELET_SERVICE]),
            ),
            ("reload systemd", paths::systemctl("daemon-reload")),
            (
                "remove staged files",
                paths::remove(&[staged[0].as_str(), staged[1].as_str()]),
            ),
        ];

        for (name, command) in commands {
            let result = run_checked(exec, &command)
                .await
                .map(|_| ())
                .map_err(BootstrapError::from);
            if let Err(e) = &result {
                warn!(step = name, error = %e, "Tear-down step failed, continuing");
            }
            steps.push(TearDownStep {
                name: name.to_string(),
                result,
            });
        }

        let report = TearDownReport {
            steps,
            finished_at: Utc::now(),
        };
        if report.is_clean() {
            info!("✅ Control plane on {} destroyed", exec.host());
        } else {
            warn!(
                failed = ?report.failed_steps(),
                "Tear-down finished with failures"
            );
        }
        report
    }

    async fn status(&self) -> Result<ClusterStatus> {
        let exec = self.exec();
        let has_admin = probe(exec, &paths::file_exists(paths::ADMIN_CONF)).await?;
        let has_manifest = probe(exec, &paths::file_exists(&paths::manifest("kube-apiserver"))).await?;

        let apiserver = match read_output(exec, &paths::healthz(self.api_server_port())).await {
            Ok(Some(body)) if body.trim() == "ok" => ServiceState::Running,
            Ok(Some(body)) if !body.trim().is_empty() => ServiceState::Error(body.trim().to_string()),
            Ok(_) => ServiceState::Stopped,
            Err(failure) => ServiceState::Error(failure.to_string()),
        };
        let kubelet = match read_output(exec, &paths::kubelet_active()).await {
            Ok(Some(text)) if text.trim() == "active" => ServiceState::Running,
            Ok(_) => ServiceState::Stopped,
            Err(failure) => ServiceState::Error(failure.to_string()),
        };

        let versions = self.component_versions().await?;
        let distinct: std::collections::BTreeSet<_> = versions.values().collect();

        let state = if !has_admin && !has_manifest {
            ClusterState::Uninitialized
        } else if distinct.len() > 1 {
            ClusterState::Upgrading
        } else if apiserver == ServiceState::Running && kubelet == ServiceState::Running {
            ClusterState::Ready
        } else {
            ClusterState::Initializing
        };

        Ok(ClusterStatus {
            state,
            apiserver,
            kubelet,
            components: versions
                .into_iter()
                .map(|(name, version)| (name, version.to_string()))
                .collect(),
        })
    }

    async fn pull_images(&self, config: &ClusterConfig) -> Result<()> {
        let version = config.kubernetes_version();
        versions::ensure_supported(version)?;

        let exec = self.exec();
        info!("Pulling control-plane images for {version} on {}...", exec.host());
        self.check_binaries(exec, version, &["kubeadm"]).await?;

        let rendered = self.templates.kubeadm_config(config)?;
        self.install(exec, &rendered, &self.layout.images_config(), "0640")
            .await?;
        run_checked(exec, &self.layout.pull_images(version)).await?;
        Ok(())
    }

    fn config_paths(&self) -> ConfigPaths {
        ConfigPaths {
            bootstrap_config: self.layout.kubeadm_config(),
            kubelet_unit: paths::KUBELET_DROPIN.to_string(),
            network_config: paths::CNI_CONFIG.to_string(),
            admin_kubeconfig: paths::ADMIN_CONF.to_string(),
            manifests_dir: paths::MANIFESTS_DIR.to_string(),
            pki_dir: paths::PKI_DIR.to_string(),
        }
    }

    fn log_commands(&self, options: LogOptions) -> LogsBundle {
        let lines = options.lines;
        let follow = if options.follow { " -f" } else { "" };
        let crictl = format!(
            "sudo crictl --runtime-endpoint {}",
            self.runtime().cri_socket()
        );

        let mut commands = BTreeMap::new();
        commands.insert(
            "kubelet".to_string(),
            format!("sudo journalctl -u kubelet -n {lines}{follow}"),
        );
        for container in paths::LOGGED_CONTAINERS {
            commands.insert(
                container.to_string(),
                format!(
                    "{crictl} logs --tail {lines}{follow} $({crictl} ps -a --name={container} -q | head -n 1)"
                ),
            );
        }
        commands.insert("container status".to_string(), format!("{crictl} ps -a"));
        commands.insert(
            "dmesg".to_string(),
            format!("sudo dmesg -PH -L=never --level warn,err,crit,alert,emerg | tail -n {lines}"),
        );
        LogsBundle { commands }
    }
}
