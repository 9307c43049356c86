//! Rendered host artifacts: kubeadm configuration, kubelet systemd units and
//! the bridge CNI configuration.

use std::fmt;

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;

use super::paths;
use super::versions::{config_api, ConfigApi};
use crate::config::{Cidr, ClusterConfig, Component, ContainerRuntime, FeatureValue};
use crate::error::{BootstrapError, Result};

/// Components that accept `--feature-gates` through kubeadm extra args.
const GATED_COMPONENTS: [Component; 3] = [
    Component::Apiserver,
    Component::ControllerManager,
    Component::Scheduler,
];

/// One `extraArgs` entry. `list` selects the `v1beta4` name/value layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arg {
    pub name: String,
    pub value: String,
    pub list: bool,
}

#[derive(Serialize)]
struct KubeadmContext<'a> {
    api_version: &'static str,
    cluster_name: &'a str,
    version_tag: String,
    node_name: &'a str,
    cri_socket: &'static str,
    advertise_address: Option<&'a str>,
    control_plane_endpoint: Option<String>,
    api_server_port: u16,
    image_repository: Option<&'a str>,
    etcd_data_dir: &'static str,
    pod_subnet: String,
    service_subnet: String,
    dns_domain: &'a str,
    cert_sans: Vec<String>,
    apiserver_args: Vec<Arg>,
    controller_manager_args: Vec<Arg>,
    scheduler_args: Vec<Arg>,
    etcd_args: Vec<Arg>,
    kubelet_args: Vec<Arg>,
    kubelet_feature_gates: Vec<Arg>,
    kube_proxy_options: Vec<Arg>,
}

/// Inputs for the kubelet drop-in.
#[derive(Debug, Clone, Serialize)]
pub struct KubeletUnit<'a> {
    /// Directory holding the kubelet binary for the wanted version.
    pub bin_dir: String,
    pub node_name: &'a str,
    pub node_ip: Option<&'a str>,
    #[serde(skip)]
    pub runtime: ContainerRuntime,
}

#[derive(Serialize)]
struct DropInContext<'a> {
    #[serde(flatten)]
    unit: &'a KubeletUnit<'a>,
    runtime_service: &'static str,
    cri_socket: &'static str,
}

/// Template set for the kubeadm strategy.
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl fmt::Debug for Templates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Templates").finish_non_exhaustive()
    }
}

impl Templates {
    /// Register the embedded templates.
    ///
    /// # Errors
    /// Returns a configuration error if a template does not parse.
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, source) in [
            ("kubeadm", KUBEADM_TEMPLATE),
            ("kubelet-service", KUBELET_SERVICE_TEMPLATE),
            ("kubelet-dropin", KUBELET_DROPIN_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, source)
                .map_err(|e| BootstrapError::config(format!("invalid {name} template: {e}")))?;
        }

        Ok(Self { handlebars })
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        self.handlebars
            .render(name, data)
            .map_err(|e| BootstrapError::config(format!("failed to render {name}: {e}")))
    }

    /// kubeadm configuration for `config`. Output is deterministic, so two
    /// renders of equal configurations compare equal byte for byte.
    ///
    /// # Errors
    /// Returns a configuration error if rendering fails.
    pub fn kubeadm_config(&self, config: &ClusterConfig) -> Result<String> {
        let api = config_api(config.kubernetes_version());
        let list = api == ConfigApi::V1Beta4;
        let networking = config.networking();
        let primary = config.primary_control_plane();
        let advertise_address = primary.and_then(|n| n.address.as_deref());

        let mut cert_sans = vec!["127.0.0.1".to_string(), "localhost".to_string()];
        if let Some(address) = advertise_address {
            cert_sans.push(address.to_string());
        }

        let args_for = |component: Component| component_args(config, component, list);

        let context = KubeadmContext {
            api_version: api.as_str(),
            cluster_name: config.name(),
            version_tag: config.kubernetes_version().tag(),
            node_name: primary.map_or(config.name(), |n| n.name.as_str()),
            cri_socket: config.container_runtime().cri_socket(),
            advertise_address,
            control_plane_endpoint: advertise_address
                .map(|address| host_port(address, networking.api_server_port)),
            api_server_port: networking.api_server_port,
            image_repository: config.image_repository(),
            etcd_data_dir: paths::ETCD_DATA_DIR,
            pod_subnet: networking.pod_subnet.to_string(),
            service_subnet: networking.service_subnet.to_string(),
            dns_domain: &networking.dns_domain,
            cert_sans,
            apiserver_args: args_for(Component::Apiserver),
            controller_manager_args: args_for(Component::ControllerManager),
            scheduler_args: args_for(Component::Scheduler),
            etcd_args: args_for(Component::Etcd),
            kubelet_args: args_for(Component::Kubelet),
            kubelet_feature_gates: kubelet_feature_gates(config),
            kube_proxy_options: config
                .extra_options_for(Component::KubeProxy)
                .map(|o| Arg {
                    name: o.key.clone(),
                    value: yaml_quote(&o.value),
                    list: false,
                })
                .collect(),
        };

        self.render("kubeadm", &context)
    }

    /// Base kubelet unit. Version independent; the drop-in sets the binary.
    ///
    /// # Errors
    /// Returns a configuration error if rendering fails.
    pub fn kubelet_service(&self) -> Result<String> {
        self.render("kubelet-service", &json!({}))
    }

    /// Kubelet drop-in pointing systemd at the versioned binary.
    ///
    /// # Errors
    /// Returns a configuration error if rendering fails.
    pub fn kubelet_dropin(&self, unit: &KubeletUnit<'_>) -> Result<String> {
        let context = DropInContext {
            unit,
            runtime_service: runtime_service(unit.runtime),
            cri_socket: unit.runtime.cri_socket(),
        };
        self.render("kubelet-dropin", &context)
    }
}

/// Bridge CNI configuration with host-local IPAM over the pod subnet.
///
/// # Errors
/// Returns a configuration error if serialization fails.
pub fn bridge_conflist(pod_subnet: &Cidr) -> Result<String> {
    let conflist = json!({
        "cniVersion": "1.0.0",
        "name": "bridge",
        "plugins": [
            {
                "type": "bridge",
                "bridge": "bridge",
                "addIf": "true",
                "isDefaultGateway": true,
                "forceAddress": false,
                "ipMasq": true,
                "hairpinMode": true,
                "ipam": {
                    "type": "host-local",
                    "subnet": pod_subnet.to_string(),
                },
            },
            {
                "type": "portmap",
                "capabilities": { "portMappings": true },
            },
        ],
    });
    serde_json::to_string_pretty(&conflist)
        .map(|mut text| {
            text.push('\n');
            text
        })
        .map_err(|e| BootstrapError::config(format!("failed to render CNI config: {e}")))
}

/// systemd unit the kubelet should wait for.
fn runtime_service(runtime: ContainerRuntime) -> &'static str {
    match runtime {
        ContainerRuntime::Containerd => "containerd.service",
        ContainerRuntime::Crio => "crio.service",
        ContainerRuntime::Docker => "cri-docker.socket",
    }
}

fn component_args(config: &ClusterConfig, component: Component, list: bool) -> Vec<Arg> {
    let mut args: Vec<Arg> = config
        .extra_options_for(component)
        .map(|o| Arg {
            name: o.key.clone(),
            value: yaml_quote(&o.value),
            list,
        })
        .collect();

    let explicit = args.iter().any(|a| a.name == "feature-gates");
    if GATED_COMPONENTS.contains(&component) && !explicit && !config.feature_gates().is_empty() {
        args.push(Arg {
            name: "feature-gates".to_string(),
            value: yaml_quote(&feature_gate_flag(config)),
            list,
        });
    }
    args
}

/// `Name=value,...` in gate-name order.
#[must_use]
pub fn feature_gate_flag(config: &ClusterConfig) -> String {
    config
        .feature_gates()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Boolean gates for the kubelet configuration. Other values only make sense
/// as component flags and are skipped.
fn kubelet_feature_gates(config: &ClusterConfig) -> Vec<Arg> {
    config
        .feature_gates()
        .iter()
        .filter_map(|(name, value)| match value {
            FeatureValue::Bool(enabled) => Some(Arg {
                name: name.clone(),
                value: enabled.to_string(),
                list: false,
            }),
            FeatureValue::Text(_) => None,
        })
        .collect()
}

fn yaml_quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    format!("\"{escaped}\"")
}

fn host_port(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

const KUBEADM_TEMPLATE: &str = r#"apiVersion: kubeadm.k8s.io/{{api_version}}
kind: InitConfiguration
localAPIEndpoint:{{#if advertise_address}}
  advertiseAddress: {{advertise_address}}{{/if}}
  bindPort: {{api_server_port}}
bootstrapTokens:
  - groups:
      - system:bootstrappers:kubeadm:default-node-token
    ttl: 24h0m0s
    usages:
      - signing
      - authentication
nodeRegistration:
  criSocket: {{cri_socket}}
  name: "{{node_name}}"{{#if kubelet_args}}
  kubeletExtraArgs:{{#each kubelet_args}}{{#if list}}
    - name: {{name}}
      value: {{value}}{{else}}
    {{name}}: {{value}}{{/if}}{{/each}}{{/if}}
  taints: []
---
apiVersion: kubeadm.k8s.io/{{api_version}}
kind: ClusterConfiguration
clusterName: {{cluster_name}}
kubernetesVersion: {{version_tag}}{{#if image_repository}}
imageRepository: "{{image_repository}}"{{/if}}{{#if control_plane_endpoint}}
controlPlaneEndpoint: {{control_plane_endpoint}}{{/if}}
certificatesDir: /etc/kubernetes/pki
apiServer:
  certSANs:{{#each cert_sans}}
    - "{{this}}"{{/each}}{{#if apiserver_args}}
  extraArgs:{{#each apiserver_args}}{{#if list}}
    - name: {{name}}
      value: {{value}}{{else}}
    {{name}}: {{value}}{{/if}}{{/each}}{{/if}}
controllerManager:{{#if controller_manager_args}}
  extraArgs:{{#each controller_manager_args}}{{#if list}}
    - name: {{name}}
      value: {{value}}{{else}}
    {{name}}: {{value}}{{/if}}{{/each}}{{else}} {}{{/if}}
scheduler:{{#if scheduler_args}}
  extraArgs:{{#each scheduler_args}}{{#if list}}
    - name: {{name}}
      value: {{value}}{{else}}
    {{name}}: {{value}}{{/if}}{{/each}}{{else}} {}{{/if}}
etcd:
  local:
    dataDir: {{etcd_data_dir}}{{#if etcd_args}}
    extraArgs:{{#each etcd_args}}{{#if list}}
      - name: {{name}}
        value: {{value}}{{else}}
      {{name}}: {{value}}{{/if}}{{/each}}{{/if}}
networking:
  dnsDomain: "{{dns_domain}}"
  podSubnet: "{{pod_subnet}}"
  serviceSubnet: {{service_subnet}}
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
authentication:
  x509:
    clientCAFile: /etc/kubernetes/pki/ca.crt
cgroupDriver: systemd
containerRuntimeEndpoint: {{cri_socket}}
clusterDomain: "{{dns_domain}}"
failSwapOn: false
staticPodPath: /etc/kubernetes/manifests{{#if kubelet_feature_gates}}
featureGates:{{#each kubelet_feature_gates}}
  {{name}}: {{value}}{{/each}}{{/if}}
---
apiVersion: kubeproxy.config.k8s.io/v1alpha1
kind: KubeProxyConfiguration
clusterCIDR: "{{pod_subnet}}"
metricsBindAddress: 0.0.0.0:10249{{#each kube_proxy_options}}
{{name}}: {{value}}{{/each}}
"#;

const KUBELET_SERVICE_TEMPLATE: &str = r"[Unit]
Description=kubelet: The Kubernetes Node Agent
Documentation=https://kubernetes.io/docs/home/
Wants=network-online.target
After=network-online.target

[Service]
ExecStart=/usr/bin/kubelet
Restart=always
StartLimitInterval=0
RestartSec=10

[Install]
WantedBy=multi-user.target
";

const KUBELET_DROPIN_TEMPLATE: &str = r"[Unit]
Wants={{runtime_service}}

[Service]
EnvironmentFile=-/var/lib/kubelet/kubeadm-flags.env
ExecStart=
ExecStart={{bin_dir}}/kubelet --bootstrap-kubeconfig=/etc/kubernetes/bootstrap-kubelet.conf --kubeconfig=/etc/kubernetes/kubelet.conf --config=/var/lib/kubelet/config.yaml --container-runtime-endpoint={{cri_socket}} --hostname-override={{node_name}}{{#if node_ip}} --node-ip={{node_ip}}{{/if}} $KUBELET_KUBEADM_ARGS

[Install]
";
