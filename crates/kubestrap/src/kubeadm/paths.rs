//! Host file locations and the shell commands the strategy issues.

use std::path::Path;

use crate::config::KubernetesVersion;
use crate::exec::shell_quote;

pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
pub const KUBELET_CONF: &str = "/etc/kubernetes/kubelet.conf";
pub const MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";
pub const PKI_DIR: &str = "/etc/kubernetes/pki";
pub const CA_CERT: &str = "/etc/kubernetes/pki/ca.crt";
pub const ETCD_DATA_DIR: &str = "/var/lib/kubestrap/etcd";
pub const KUBELET_SERVICE: &str = "/lib/systemd/system/kubelet.service";
pub const KUBELET_DROPIN: &str = "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf";
pub const CNI_CONFIG: &str = "/etc/cni/net.d/1-kubestrap-bridge.conflist";

/// Static pods whose image tags carry the control-plane version.
pub const VERSIONED_STATIC_PODS: [&str; 3] = [
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
];

/// Containers worth collecting logs from.
pub const LOGGED_CONTAINERS: [&str; 6] = [
    "kube-apiserver",
    "etcd",
    "kube-scheduler",
    "kube-controller-manager",
    "kube-proxy",
    "coredns",
];

/// Preflight checks kubeadm may trip over on hosts we manage ourselves.
const IGNORED_PREFLIGHT: &str = "DirAvailable--etc-kubernetes-manifests,DirAvailable--var-lib-kubestrap-etcd,FileAvailable--etc-kubernetes-manifests-kube-apiserver.yaml,FileAvailable--etc-kubernetes-manifests-kube-controller-manager.yaml,FileAvailable--etc-kubernetes-manifests-kube-scheduler.yaml,FileAvailable--etc-kubernetes-manifests-etcd.yaml,Port-10250,Swap,NumCPU,Mem";

/// Where versioned binaries and generated files live on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    binaries_dir: String,
    staging_dir: String,
}

impl Layout {
    #[must_use]
    pub fn new(binaries_dir: &Path, staging_dir: &Path) -> Self {
        Self {
            binaries_dir: trim_slash(binaries_dir),
            staging_dir: trim_slash(staging_dir),
        }
    }

    /// Directory with the binaries for `version`.
    #[must_use]
    pub fn bin_dir(&self, version: &KubernetesVersion) -> String {
        format!("{}/{}", self.binaries_dir, version.tag())
    }

    #[must_use]
    pub fn staging_dir(&self) -> &str {
        &self.staging_dir
    }

    /// Staged kubeadm configuration used for init.
    #[must_use]
    pub fn kubeadm_config(&self) -> String {
        format!("{}/kubeadm.yaml", self.staging_dir)
    }

    /// Scratch configuration used only for image pulls.
    #[must_use]
    pub fn images_config(&self) -> String {
        format!("{}/kubeadm-images.yaml", self.staging_dir)
    }

    #[must_use]
    pub fn has_binary(&self, version: &KubernetesVersion, binary: &str) -> String {
        format!("sudo test -x {}/{binary}", self.bin_dir(version))
    }

    /// `kubeadm` from the versioned directory, with that directory first on
    /// `PATH` so kubeadm finds the matching kubectl and kubelet.
    #[must_use]
    pub fn kubeadm(&self, version: &KubernetesVersion, args: &str) -> String {
        format!(
            "sudo env PATH=\"{}:$PATH\" kubeadm {args}",
            self.bin_dir(version)
        )
    }

    #[must_use]
    pub fn kubectl(&self, version: &KubernetesVersion, args: &str) -> String {
        format!(
            "sudo {}/kubectl --kubeconfig={ADMIN_CONF} {args}",
            self.bin_dir(version)
        )
    }

    #[must_use]
    pub fn init(&self, version: &KubernetesVersion) -> String {
        self.kubeadm(
            version,
            &format!(
                "init --config {} --ignore-preflight-errors={IGNORED_PREFLIGHT}",
                self.kubeadm_config()
            ),
        )
    }

    /// `kubeadm init phase` commands that regenerate control-plane state
    /// from the staged configuration, in order.
    #[must_use]
    pub fn reconfigure_phases(&self, version: &KubernetesVersion) -> Vec<String> {
        [
            "certs all",
            "kubeconfig all",
            "kubelet-start",
            "control-plane all",
            "etcd local",
        ]
        .iter()
        .map(|phase| {
            self.kubeadm(
                version,
                &format!("init phase {phase} --config {}", self.kubeadm_config()),
            )
        })
        .collect()
    }

    #[must_use]
    pub fn reset(&self, version: &KubernetesVersion) -> String {
        self.kubeadm(version, "reset --force")
    }

    #[must_use]
    pub fn pull_images(&self, version: &KubernetesVersion) -> String {
        self.kubeadm(
            version,
            &format!("config images pull --config {}", self.images_config()),
        )
    }

    #[must_use]
    pub fn upgrade_apply(&self, target: &KubernetesVersion) -> String {
        self.kubeadm(
            target,
            &format!(
                "upgrade apply {} --yes --certificate-renewal=false",
                target.tag()
            ),
        )
    }

    #[must_use]
    pub fn create_join_command(&self, version: &KubernetesVersion) -> String {
        self.kubeadm(version, "token create --print-join-command --ttl=15m")
    }

    #[must_use]
    pub fn upload_certs(&self, version: &KubernetesVersion) -> String {
        self.kubeadm(version, "init phase upload-certs --upload-certs")
    }
}

fn trim_slash(path: &Path) -> String {
    let text = path.display().to_string();
    match text.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[must_use]
pub fn file_exists(path: &str) -> String {
    format!("sudo test -f {}", shell_quote(path))
}

#[must_use]
pub fn file_not_empty(path: &str) -> String {
    format!("sudo test -s {}", shell_quote(path))
}

#[must_use]
pub fn cat(path: &str) -> String {
    format!("sudo cat {}", shell_quote(path))
}

/// Static pod manifest path for a component.
#[must_use]
pub fn manifest(component: &str) -> String {
    format!("{MANIFESTS_DIR}/{component}.yaml")
}

/// Image line of a static pod manifest.
#[must_use]
pub fn manifest_image(component: &str) -> String {
    format!("sudo grep -h \"image:\" {}", manifest(component))
}

#[must_use]
pub fn systemctl(args: &str) -> String {
    format!("sudo systemctl {args}")
}

#[must_use]
pub fn healthz(port: u16) -> String {
    format!("curl -sk --max-time 5 https://localhost:{port}/healthz")
}

#[must_use]
pub fn kubelet_active() -> String {
    systemctl("is-active kubelet")
}

#[must_use]
pub fn remove(paths: &[&str]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
    format!("sudo rm -rf {}", quoted.join(" "))
}
