//! Join credentials minted on the control plane.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::paths::Layout;
use crate::config::{ContainerRuntime, KubernetesVersion, NodeConfig, NodeRole};
use crate::error::CommandFailure;
use crate::exec::shell_quote;

static JOIN_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"kubeadm join\s+(\S+)\s+--token\s+(\S+)[\s\\]+--discovery-token-ca-cert-hash\s+(\S+)",
    )
    .ok()
});

static CERTIFICATE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([0-9a-f]{64})\s*$").ok());

/// Error fragments kubeadm prints when the bootstrap token is no longer
/// accepted.
const REJECTION_MARKERS: [&str; 5] = [
    "invalid bootstrap token",
    "token id",
    "could not find a jws signature",
    "unauthorized",
    "expired",
];

/// Bootstrap token plus discovery data for `kubeadm join`.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCredentials {
    pub endpoint: String,
    pub token: String,
    pub ca_cert_hash: String,
    /// Decrypts uploaded control-plane certificates.
    pub certificate_key: Option<String>,
}

impl fmt::Debug for JoinCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredentials")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("ca_cert_hash", &self.ca_cert_hash)
            .field(
                "certificate_key",
                &self.certificate_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl JoinCredentials {
    /// Parse `kubeadm token create --print-join-command` output.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let captures = JOIN_LINE.as_ref()?.captures(output)?;
        Some(Self {
            endpoint: captures.get(1)?.as_str().to_string(),
            token: captures.get(2)?.as_str().to_string(),
            ca_cert_hash: captures.get(3)?.as_str().to_string(),
            certificate_key: None,
        })
    }

    #[must_use]
    pub fn with_certificate_key(mut self, key: String) -> Self {
        self.certificate_key = Some(key);
        self
    }

    /// Full join command for `node`.
    #[must_use]
    pub fn command(
        &self,
        layout: &Layout,
        version: &KubernetesVersion,
        node: &NodeConfig,
        runtime: ContainerRuntime,
    ) -> String {
        let mut args = format!(
            "join {} --token {} --discovery-token-ca-cert-hash {} --node-name {} --cri-socket {} --ignore-preflight-errors=all",
            self.endpoint,
            self.token,
            self.ca_cert_hash,
            shell_quote(&node.name),
            runtime.cri_socket(),
        );
        if node.role == NodeRole::ControlPlane {
            args.push_str(" --control-plane");
            if let Some(key) = &self.certificate_key {
                args.push_str(&format!(" --certificate-key {key}"));
            }
            if let Some(address) = &node.address {
                args.push_str(&format!(
                    " --apiserver-advertise-address {}",
                    shell_quote(address)
                ));
            }
        }
        layout.kubeadm(version, &args)
    }
}

/// Certificate key from `kubeadm init phase upload-certs --upload-certs`.
#[must_use]
pub fn parse_certificate_key(output: &str) -> Option<String> {
    CERTIFICATE_KEY
        .as_ref()?
        .captures_iter(output)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether a failed join was caused by stale or rejected credentials.
#[must_use]
pub fn is_credential_rejection(failure: &CommandFailure) -> bool {
    if failure.is_transient() {
        return false;
    }
    let text = format!("{}\n{}", failure.stderr, failure.stdout).to_lowercase();
    REJECTION_MARKERS.iter().any(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const JOIN_OUTPUT: &str = "kubeadm join 192.168.49.2:8443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:1234 \n";

    fn failure(stderr: &str) -> CommandFailure {
        CommandFailure {
            host: "worker-1".into(),
            command: "kubeadm join".into(),
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
            transport: None,
        }
    }

    #[test]
    fn test_parse_join_command() {
        let creds = JoinCredentials::parse(JOIN_OUTPUT).unwrap();
        assert_eq!(creds.endpoint, "192.168.49.2:8443");
        assert_eq!(creds.token, "abcdef.0123456789abcdef");
        assert_eq!(creds.ca_cert_hash, "sha256:1234");
        assert!(JoinCredentials::parse("error: no token").is_none());

        let wrapped = "kubeadm join 10.0.0.1:6443 --token a.b \\\n\t--discovery-token-ca-cert-hash sha256:ff";
        assert_eq!(JoinCredentials::parse(wrapped).unwrap().ca_cert_hash, "sha256:ff");
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = JoinCredentials::parse(JOIN_OUTPUT).unwrap();
        let text = format!("{creds:?}");
        assert!(!text.contains("0123456789abcdef"));
        assert!(text.contains("192.168.49.2:8443"));
    }

    #[test]
    fn test_worker_and_control_plane_commands() {
        let layout = Layout::new(
            &PathBuf::from("/var/lib/kubestrap/binaries"),
            &PathBuf::from("/var/tmp/kubestrap"),
        );
        let version: KubernetesVersion = "1.28.0".parse().unwrap();
        let creds = JoinCredentials::parse(JOIN_OUTPUT).unwrap();

        let worker = creds.command(
            &layout,
            &version,
            &NodeConfig::worker("worker-1"),
            ContainerRuntime::Containerd,
        );
        assert!(worker.contains("kubeadm join 192.168.49.2:8443"));
        assert!(worker.contains("--node-name worker-1"));
        assert!(!worker.contains("--control-plane"));

        let control_plane = creds
            .with_certificate_key("f".repeat(64))
            .command(
                &layout,
                &version,
                &NodeConfig::control_plane("cp-2").with_address("192.168.49.3"),
                ContainerRuntime::Containerd,
            );
        assert!(control_plane.contains("--control-plane --certificate-key ffff"));
        assert!(control_plane.contains("--apiserver-advertise-address 192.168.49.3"));
    }

    #[test]
    fn test_parse_certificate_key() {
        let key = "a".repeat(64);
        let output = format!("[upload-certs] Using certificate key:\n{key}\n");
        assert_eq!(parse_certificate_key(&output), Some(key));
        assert_eq!(parse_certificate_key("nothing here"), None);
    }

    #[test]
    fn test_credential_rejection_detection() {
        assert!(is_credential_rejection(&failure(
            "error execution phase preflight: couldn't validate the identity of the API Server: could not find a JWS signature in the cluster-info ConfigMap for token ID \"abcdef\""
        )));
        assert!(is_credential_rejection(&failure("Unauthorized")));
        assert!(!is_credential_rejection(&failure(
            "[ERROR FileAvailable--etc-kubernetes-kubelet.conf]: exists"
        )));
    }
}
