//! Declarative cluster configuration.
//!
//! A [`ClusterConfig`] is validated on every construction path (builder,
//! YAML, JSON) and is immutable afterwards. Strategies receive it by
//! reference and decide for themselves which versions they support.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Default pod network range.
pub const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";

/// Default service network range.
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";

/// Default cluster DNS domain.
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";

/// Default API server bind port.
pub const DEFAULT_API_SERVER_PORT: u16 = 8443;

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "kubestrap";

/// Errors raised while validating cluster configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid Kubernetes version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("invalid CIDR '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("pod subnet {pod} overlaps service subnet {service}")]
    OverlappingSubnets { pod: String, service: String },

    #[error("node list has no control-plane node")]
    MissingControlPlane,

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("invalid name '{0}': must be a non-empty DNS label")]
    InvalidName(String),

    #[error("invalid feature gate '{0}'")]
    InvalidFeatureGate(String),

    #[error("duplicate extra option {component}.{key}")]
    DuplicateExtraOption { component: Component, key: String },

    #[error("invalid extra option key '{0}': use letters, digits and '-'")]
    InvalidExtraOption(String),

    #[error("invalid DNS domain '{0}'")]
    InvalidDnsDomain(String),

    #[error("invalid image repository '{0}'")]
    InvalidImageRepository(String),

    #[error("API server port must be non-zero")]
    InvalidPort,

    #[error("failed to parse cluster config: {0}")]
    Parse(String),

    #[error("failed to read cluster config {path}: {message}")]
    Io { path: String, message: String },
}

/// A Kubernetes release, parsed as a semantic version.
///
/// Accepts an optional leading `v`. The original text is kept so
/// serialization gives back exactly what was read.
#[derive(Debug, Clone)]
pub struct KubernetesVersion {
    version: semver::Version,
    raw: String,
}

impl KubernetesVersion {
    /// Parsed semantic version.
    #[must_use]
    pub fn semver(&self) -> &semver::Version {
        &self.version
    }

    /// Major component.
    #[must_use]
    pub fn major(&self) -> u64 {
        self.version.major
    }

    /// Minor component.
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    /// Tag form used by Kubernetes release artifacts, e.g. `v1.28.0`.
    #[must_use]
    pub fn tag(&self) -> String {
        format!("v{}", self.version)
    }

    /// Text as originally supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for KubernetesVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let version = semver::Version::parse(bare).map_err(|e| ConfigError::InvalidVersion {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            version,
            raw: trimmed.to_string(),
        })
    }
}

impl fmt::Display for KubernetesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

impl PartialEq for KubernetesVersion {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for KubernetesVersion {}

impl PartialOrd for KubernetesVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KubernetesVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.version.cmp(&other.version)
    }
}

impl std::hash::Hash for KubernetesVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl Serialize for KubernetesVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for KubernetesVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An IPv4 or IPv6 network block in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Network address.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn bits(&self) -> (u128, u8) {
        match self.addr {
            IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
            IpAddr::V6(v6) => (u128::from(v6), 128),
        }
    }

    /// Whether two blocks share any address. Blocks of different address
    /// families never overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Cidr) -> bool {
        let (a, width) = self.bits();
        let (b, other_width) = other.bits();
        if width != other_width {
            return false;
        }
        let shortest = self.prefix.min(other.prefix);
        let mask = network_mask(width, shortest);
        a & mask == b & mask
    }
}

fn network_mask(width: u8, prefix: u8) -> u128 {
    if prefix == 0 {
        return 0;
    }
    let all = if width == 32 {
        u128::from(u32::MAX)
    } else {
        u128::MAX
    };
    let host_bits = u32::from(width - prefix);
    all & !((1u128 << host_bits).wrapping_sub(1))
}

impl FromStr for Cidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidCidr {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("missing '/<prefix>'"))?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;

        let cidr = Self { addr, prefix };
        let (bits, width) = cidr.bits();
        if prefix > width {
            return Err(invalid("prefix length exceeds address width"));
        }
        if bits & !network_mask(width, prefix) & mask_for_width(width) != 0 {
            return Err(invalid("host bits set; use the network address"));
        }
        Ok(cidr)
    }
}

fn mask_for_width(width: u8) -> u128 {
    if width == 32 {
        u128::from(u32::MAX)
    } else {
        u128::MAX
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs the API server, scheduler, controller manager and etcd.
    #[default]
    ControlPlane,
    /// Runs workloads only.
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// A node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name as registered with the API server.
    pub name: String,
    /// Node role.
    #[serde(default)]
    pub role: NodeRole,
    /// Address the node is reachable at, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl NodeConfig {
    /// Worker node with the given name.
    #[must_use]
    pub fn worker(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::Worker,
            address: None,
        }
    }

    /// Control-plane node with the given name.
    #[must_use]
    pub fn control_plane(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::ControlPlane,
            address: None,
        }
    }

    /// Set the node address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Value of a feature gate. Unknown gates are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Text(String),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Control-plane component that can receive extra arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Apiserver,
    ControllerManager,
    Scheduler,
    Etcd,
    Kubelet,
    KubeProxy,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apiserver => write!(f, "apiserver"),
            Self::ControllerManager => write!(f, "controller-manager"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Etcd => write!(f, "etcd"),
            Self::Kubelet => write!(f, "kubelet"),
            Self::KubeProxy => write!(f, "kube-proxy"),
        }
    }
}

/// A `--key=value` argument passed verbatim to one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraOption {
    pub component: Component,
    pub key: String,
    pub value: String,
}

/// Container runtime the kubelet talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Containerd,
    Crio,
    /// Docker Engine through cri-dockerd.
    Docker,
}

impl ContainerRuntime {
    /// CRI endpoint for this runtime.
    #[must_use]
    pub fn cri_socket(&self) -> &'static str {
        match self {
            Self::Containerd => "unix:///run/containerd/containerd.sock",
            Self::Crio => "unix:///var/run/crio/crio.sock",
            Self::Docker => "unix:///var/run/cri-dockerd.sock",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Containerd => write!(f, "containerd"),
            Self::Crio => write!(f, "crio"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// Pod network setup handled by the bootstrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlugin {
    /// Single-host bridge CNI with host-local IPAM over the pod subnet.
    #[default]
    Bridge,
    /// Leave pod networking to the caller.
    None,
}

/// Cluster networking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Networking {
    pub pod_subnet: Cidr,
    pub service_subnet: Cidr,
    pub dns_domain: String,
    pub api_server_port: u16,
}

/// Validated description of the desired cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClusterConfigSpec")]
pub struct ClusterConfig {
    name: String,
    kubernetes_version: KubernetesVersion,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    nodes: Vec<NodeConfig>,
    networking: Networking,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    feature_gates: BTreeMap<String, FeatureValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_options: Vec<ExtraOption>,
    container_runtime: ContainerRuntime,
    network_plugin: NetworkPlugin,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_repository: Option<String>,
}

/// Unvalidated form, shared by the builder and deserialization.
#[derive(Debug, Clone, Deserialize)]
struct ClusterConfigSpec {
    #[serde(default = "default_name")]
    name: String,
    kubernetes_version: String,
    #[serde(default)]
    nodes: Vec<NodeConfig>,
    #[serde(default)]
    networking: NetworkingSpec,
    #[serde(default)]
    feature_gates: BTreeMap<String, FeatureValue>,
    #[serde(default)]
    extra_options: Vec<ExtraOption>,
    #[serde(default)]
    container_runtime: ContainerRuntime,
    #[serde(default)]
    network_plugin: NetworkPlugin,
    #[serde(default)]
    image_repository: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct NetworkingSpec {
    pod_subnet: String,
    service_subnet: String,
    dns_domain: String,
    api_server_port: u16,
}

impl Default for NetworkingSpec {
    fn default() -> Self {
        Self {
            pod_subnet: DEFAULT_POD_SUBNET.to_string(),
            service_subnet: DEFAULT_SERVICE_SUBNET.to_string(),
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
            api_server_port: DEFAULT_API_SERVER_PORT,
        }
    }
}

fn default_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Dotted DNS name such as `cluster.local`.
fn is_dns_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Component flag names and kube-proxy fields: `audit-log-maxage`, `mode`.
fn is_option_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('-')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Registry paths such as `registry.example.com:5000/k8s`.
fn is_image_repository(repository: &str) -> bool {
    !repository.is_empty()
        && repository
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:@".contains(c))
}

impl TryFrom<ClusterConfigSpec> for ClusterConfig {
    type Error = ConfigError;

    fn try_from(spec: ClusterConfigSpec) -> Result<Self, Self::Error> {
        if !is_dns_label(&spec.name) {
            return Err(ConfigError::InvalidName(spec.name));
        }

        let kubernetes_version: KubernetesVersion = spec.kubernetes_version.parse()?;

        let pod_subnet: Cidr = spec.networking.pod_subnet.parse()?;
        let service_subnet: Cidr = spec.networking.service_subnet.parse()?;
        if pod_subnet.overlaps(&service_subnet) {
            return Err(ConfigError::OverlappingSubnets {
                pod: pod_subnet.to_string(),
                service: service_subnet.to_string(),
            });
        }
        if spec.networking.api_server_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !is_dns_name(&spec.networking.dns_domain) {
            return Err(ConfigError::InvalidDnsDomain(spec.networking.dns_domain));
        }
        if let Some(repository) = &spec.image_repository {
            if !is_image_repository(repository) {
                return Err(ConfigError::InvalidImageRepository(repository.clone()));
            }
        }

        let mut seen = HashSet::new();
        for node in &spec.nodes {
            if !is_dns_label(&node.name) {
                return Err(ConfigError::InvalidName(node.name.clone()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }
        if !spec.nodes.is_empty() && !spec.nodes.iter().any(|n| n.role == NodeRole::ControlPlane)
        {
            return Err(ConfigError::MissingControlPlane);
        }

        for gate in spec.feature_gates.keys() {
            if gate.is_empty() || !gate.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::InvalidFeatureGate(gate.clone()));
            }
        }

        let mut option_keys = HashSet::new();
        for option in &spec.extra_options {
            if !is_option_key(&option.key) {
                return Err(ConfigError::InvalidExtraOption(option.key.clone()));
            }
            if !option_keys.insert((option.component, option.key.as_str())) {
                return Err(ConfigError::DuplicateExtraOption {
                    component: option.component,
                    key: option.key.clone(),
                });
            }
        }

        Ok(Self {
            name: spec.name,
            kubernetes_version,
            nodes: spec.nodes,
            networking: Networking {
                pod_subnet,
                service_subnet,
                dns_domain: spec.networking.dns_domain,
                api_server_port: spec.networking.api_server_port,
            },
            feature_gates: spec.feature_gates,
            extra_options: spec.extra_options,
            container_runtime: spec.container_runtime,
            network_plugin: spec.network_plugin,
            image_repository: spec.image_repository,
        })
    }
}

impl ClusterConfig {
    /// Start building a configuration for the given Kubernetes version.
    #[must_use]
    pub fn builder(kubernetes_version: impl Into<String>) -> ClusterConfigBuilder {
        ClusterConfigBuilder {
            spec: ClusterConfigSpec {
                name: default_name(),
                kubernetes_version: kubernetes_version.into(),
                nodes: Vec::new(),
                networking: NetworkingSpec::default(),
                feature_gates: BTreeMap::new(),
                extra_options: Vec::new(),
                container_runtime: ContainerRuntime::default(),
                network_plugin: NetworkPlugin::default(),
                image_repository: None,
            },
        }
    }

    /// Parse YAML (JSON is a subset and parses too).
    ///
    /// # Errors
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Serialize to YAML.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Copy of this configuration targeting another version.
    #[must_use]
    pub fn with_version(&self, version: KubernetesVersion) -> Self {
        let mut next = self.clone();
        next.kubernetes_version = version;
        next
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kubernetes_version(&self) -> &KubernetesVersion {
        &self.kubernetes_version
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    /// Nodes with the worker role.
    pub fn workers(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Worker)
    }

    /// Name of the first control-plane node, if nodes are listed.
    #[must_use]
    pub fn primary_control_plane(&self) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.role == NodeRole::ControlPlane)
    }

    #[must_use]
    pub fn networking(&self) -> &Networking {
        &self.networking
    }

    #[must_use]
    pub fn feature_gates(&self) -> &BTreeMap<String, FeatureValue> {
        &self.feature_gates
    }

    #[must_use]
    pub fn extra_options(&self) -> &[ExtraOption] {
        &self.extra_options
    }

    /// Extra options for one component, in declaration order.
    pub fn extra_options_for(&self, component: Component) -> impl Iterator<Item = &ExtraOption> {
        self.extra_options
            .iter()
            .filter(move |o| o.component == component)
    }

    #[must_use]
    pub fn container_runtime(&self) -> ContainerRuntime {
        self.container_runtime
    }

    #[must_use]
    pub fn network_plugin(&self) -> NetworkPlugin {
        self.network_plugin
    }

    #[must_use]
    pub fn image_repository(&self) -> Option<&str> {
        self.image_repository.as_deref()
    }
}

/// Builder for [`ClusterConfig`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ClusterConfigBuilder {
    spec: ClusterConfigSpec,
}

impl ClusterConfigBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    #[must_use]
    pub fn pod_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.spec.networking.pod_subnet = cidr.into();
        self
    }

    #[must_use]
    pub fn service_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.spec.networking.service_subnet = cidr.into();
        self
    }

    #[must_use]
    pub fn dns_domain(mut self, domain: impl Into<String>) -> Self {
        self.spec.networking.dns_domain = domain.into();
        self
    }

    #[must_use]
    pub fn api_server_port(mut self, port: u16) -> Self {
        self.spec.networking.api_server_port = port;
        self
    }

    #[must_use]
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.spec.nodes.push(node);
        self
    }

    #[must_use]
    pub fn feature_gate(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.spec.feature_gates.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn extra_option(
        mut self,
        component: Component,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.spec.extra_options.push(ExtraOption {
            component,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn container_runtime(mut self, runtime: ContainerRuntime) -> Self {
        self.spec.container_runtime = runtime;
        self
    }

    #[must_use]
    pub fn network_plugin(mut self, plugin: NetworkPlugin) -> Self {
        self.spec.network_plugin = plugin;
        self
    }

    #[must_use]
    pub fn image_repository(mut self, repository: impl Into<String>) -> Self {
        self.spec.image_repository = Some(repository.into());
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    /// Returns the first invariant violation found.
    pub fn build(self) -> Result<ClusterConfig, ConfigError> {
        ClusterConfig::try_from(self.spec)
    }
}
