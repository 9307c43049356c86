//! Simulated host for lifecycle tests.
//!
//! `FakeHost` keeps a tiny model of a node (files, installed binary
//! versions, kubelet state) and interprets the commands the kubeadm strategy
//! issues. Every command and file copy is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use kubestrap::exec::{CommandOutput, ExecError, RemoteExecutor};

pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
pub const KUBELET_CONF: &str = "/etc/kubernetes/kubelet.conf";
pub const CA_CERT: &str = "/etc/kubernetes/pki/ca.crt";
pub const STAGED_CONFIG: &str = "/var/tmp/kubestrap/kubeadm.yaml";
pub const KUBELET_DROPIN: &str = "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf";

const STATIC_PODS: [&str; 3] = [
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
];

/// Commands that only read state.
const READ_ONLY_PREFIXES: [&str; 7] = [
    "sudo test ",
    "sudo cat ",
    "sudo grep ",
    "sudo systemctl is-active",
    "curl ",
    "sudo crictl",
    "sudo journalctl",
];

/// State shared by every host of one simulated cluster.
#[derive(Debug, Default)]
pub struct Cluster {
    pub nodes: BTreeSet<String>,
    pub tokens_issued: u32,
}

#[derive(Debug, Default)]
pub struct HostState {
    pub files: BTreeMap<String, String>,
    /// Installed binary directories, e.g. `v1.28.0`.
    pub versions: BTreeSet<String>,
    pub kubelet_enabled: bool,
    pub kubelet_running: bool,
    /// Health checks that still answer "not ready" once the apiserver runs.
    pub unhealthy_polls: u32,
    /// Every command exits non-zero.
    pub fail_commands: bool,
    /// Every command fails at the transport level.
    pub offline: bool,
    /// Join attempts to reject as if the token were stale.
    pub reject_joins: u32,
    /// The kubelet unit fails to start.
    pub kubelet_start_fails: bool,
    pub log: Vec<String>,
}

pub struct FakeHost {
    name: String,
    state: Mutex<HostState>,
    cluster: Arc<Mutex<Cluster>>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput::ok(stdout)
}

fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput::failed(code, stderr)
}

fn status(success: bool) -> CommandOutput {
    if success {
        ok("")
    } else {
        fail(1, "")
    }
}

pub fn manifest(component: &str, version: &str) -> String {
    format!(
        "apiVersion: v1\nkind: Pod\nmetadata:\n  name: {component}\nspec:\n  containers:\n  - name: {component}\n    image: registry.k8s.io/{component}:{version}\n"
    )
}

fn manifest_path(component: &str) -> String {
    format!("/etc/kubernetes/manifests/{component}.yaml")
}

impl FakeHost {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(HostState::default()),
            cluster: Arc::new(Mutex::new(Cluster::default())),
        })
    }

    /// Another host in the same cluster as `peer`.
    pub fn node(name: &str, peer: &FakeHost) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(HostState::default()),
            cluster: peer.cluster.clone(),
        })
    }

    pub fn with_versions(self: Arc<Self>, versions: &[&str]) -> Arc<Self> {
        self.state()
            .versions
            .extend(versions.iter().map(|v| (*v).to_string()));
        self
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    pub fn cluster(&self) -> MutexGuard<'_, Cluster> {
        self.cluster.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Recorded commands that change host state.
    pub fn mutating_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|cmd| {
                !READ_ONLY_PREFIXES.iter().any(|p| cmd.starts_with(p))
                    && !(cmd.contains("/kubectl ") && cmd.contains(" get node "))
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub fn set_file(&self, path: &str, contents: &str) {
        self.state()
            .files
            .insert(path.to_string(), contents.to_string());
    }

    fn interpret(&self, st: &mut HostState, cmd: &str) -> CommandOutput {
        if st.fail_commands {
            return fail(1, "permission denied");
        }

        if let Some(rest) = cmd.strip_prefix("sudo test -x ") {
            let version = rest
                .rsplit_once('/')
                .and_then(|(dir, _)| dir.rsplit('/').next())
                .unwrap_or_default();
            return status(st.versions.contains(version));
        }
        if let Some(path) = cmd.strip_prefix("sudo test -f ") {
            return status(st.files.contains_key(path));
        }
        if let Some(path) = cmd.strip_prefix("sudo test -s ") {
            return status(st.files.get(path).is_some_and(|c| !c.is_empty()));
        }
        if let Some(path) = cmd.strip_prefix("sudo cat ") {
            return match st.files.get(path) {
                Some(contents) => ok(contents.clone()),
                None => fail(1, "No such file or directory"),
            };
        }
        if let Some(path) = cmd.strip_prefix("sudo grep -h \"image:\" ") {
            return match st.files.get(path) {
                Some(contents) => {
                    let lines: Vec<&str> =
                        contents.lines().filter(|l| l.contains("image:")).collect();
                    status(!lines.is_empty()).with_stdout(lines.join("\n"))
                }
                None => fail(2, "No such file or directory"),
            };
        }
        if let Some(args) = cmd.strip_prefix("sudo systemctl ") {
            return self.systemctl(st, args);
        }
        if cmd.starts_with("curl -sk") && cmd.ends_with("/healthz") {
            let up = st.files.contains_key(&manifest_path("kube-apiserver")) && st.kubelet_running;
            if !up {
                return fail(7, "Failed to connect");
            }
            if st.unhealthy_polls > 0 {
                st.unhealthy_polls -= 1;
                return ok("[-]etcd failed: reason withheld\nhealthz check failed");
            }
            return ok("ok");
        }
        if let Some(args) = cmd.strip_prefix("sudo rm -rf ") {
            for target in args.split_whitespace() {
                let target = target.trim_matches('\'');
                let prefix = format!("{}/", target.trim_end_matches('/'));
                st.files
                    .retain(|path, _| path != target && !path.starts_with(&prefix));
            }
            return ok("");
        }
        if let Some(rest) = cmd.strip_prefix("sudo env PATH=\"") {
            let Some((dir, args)) = rest.split_once(":$PATH\" kubeadm ") else {
                return fail(127, "malformed kubeadm invocation");
            };
            let version = dir.rsplit('/').next().unwrap_or_default().to_string();
            return self.kubeadm(st, &version, args);
        }
        if cmd.contains("/kubectl --kubeconfig=") && cmd.contains(" get node ") {
            let node = cmd.split_whitespace().last().unwrap_or_default();
            return status(self.cluster().nodes.contains(node));
        }
        if cmd.starts_with("sudo crictl") || cmd.starts_with("sudo journalctl") || cmd.starts_with("sudo dmesg") {
            return ok(format!("logs from {}", self.name));
        }
        fail(127, "command not found")
    }

    fn systemctl(&self, st: &mut HostState, args: &str) -> CommandOutput {
        match args {
            "daemon-reload" => ok(""),
            "enable kubelet" => {
                st.kubelet_enabled = true;
                ok("")
            }
            "disable kubelet" => {
                st.kubelet_enabled = false;
                ok("")
            }
            "start kubelet" | "restart kubelet" if st.kubelet_start_fails => {
                st.kubelet_running = false;
                fail(1, "Job for kubelet.service failed because the control process exited with error code.")
            }
            "start kubelet" | "restart kubelet" => {
                st.kubelet_running = st.files.contains_key(KUBELET_DROPIN);
                status(st.kubelet_running)
            }
            "stop kubelet" => {
                st.kubelet_running = false;
                ok("")
            }
            "is-active kubelet" => {
                if st.kubelet_running {
                    ok("active\n")
                } else {
                    CommandOutput {
                        stdout: "inactive\n".to_string(),
                        stderr: String::new(),
                        exit_code: 3,
                    }
                }
            }
            _ => fail(1, "unknown systemctl invocation"),
        }
    }

    fn write_control_plane(st: &mut HostState, version: &str) {
        for component in STATIC_PODS {
            st.files
                .insert(manifest_path(component), manifest(component, version));
        }
    }

    fn kubeadm(&self, st: &mut HostState, version: &str, args: &str) -> CommandOutput {
        if !st.versions.contains(version) {
            return fail(127, "kubeadm: command not found");
        }

        if args.starts_with("init --config") {
            st.files.insert(CA_CERT.to_string(), "CA".to_string());
            st.files.insert(ADMIN_CONF.to_string(), "admin".to_string());
            st.files.insert(KUBELET_CONF.to_string(), "kubelet".to_string());
            Self::write_control_plane(st, version);
            st.files
                .insert(manifest_path("etcd"), manifest("etcd", "3.5.9-0"));
            st.kubelet_running = true;
            self.cluster().nodes.insert(self.name.clone());
            return ok("Your Kubernetes control-plane has initialized successfully!");
        }
        if args.starts_with("init phase upload-certs") {
            return ok(format!(
                "[upload-certs] Storing the certificates in Secret\n[upload-certs] Using certificate key:\n{}\n",
                "ab".repeat(32)
            ));
        }
        if args.starts_with("init phase control-plane all") {
            Self::write_control_plane(st, version);
            return ok("");
        }
        if args.starts_with("init phase kubelet-start") {
            st.kubelet_running = true;
            return ok("");
        }
        if args.starts_with("init phase") {
            return ok("");
        }
        if args.starts_with("reset --force") {
            st.files.retain(|path, _| !path.starts_with("/etc/kubernetes/"));
            st.kubelet_running = false;
            self.cluster().nodes.remove(&self.name);
            return ok("");
        }
        if args.starts_with("upgrade apply ") {
            let target = args.split_whitespace().nth(2).unwrap_or_default();
            if target != version {
                return fail(1, "kubeadm version does not match target");
            }
            Self::write_control_plane(st, target);
            return ok(format!("[upgrade/successful] SUCCESS! Your cluster was upgraded to \"{target}\""));
        }
        if args.starts_with("config images pull") {
            return ok("[config/images] Pulled registry.k8s.io/kube-apiserver");
        }
        if args.starts_with("token create") {
            let mut cluster = self.cluster();
            cluster.tokens_issued += 1;
            return ok(format!(
                "kubeadm join 192.168.49.2:8443 --token abcdef.{:016} --discovery-token-ca-cert-hash sha256:{} \n",
                cluster.tokens_issued,
                "0".repeat(64)
            ));
        }
        if args.starts_with("join ") {
            if st.reject_joins > 0 {
                st.reject_joins -= 1;
                return fail(
                    1,
                    "error execution phase preflight: couldn't validate the identity of the API Server: could not find a JWS signature in the cluster-info ConfigMap for token ID \"abcdef\"",
                );
            }
            let mut words = args.split_whitespace();
            let name = words
                .by_ref()
                .skip_while(|w| *w != "--node-name")
                .nth(1)
                .unwrap_or_default()
                .to_string();
            st.files.insert(KUBELET_CONF.to_string(), "kubelet".to_string());
            st.kubelet_running = true;
            self.cluster().nodes.insert(name);
            return ok("This node has joined the cluster");
        }
        fail(1, "unknown kubeadm invocation")
    }
}

trait WithStdout {
    fn with_stdout(self, stdout: String) -> Self;
}

impl WithStdout for CommandOutput {
    fn with_stdout(mut self, stdout: String) -> Self {
        self.stdout = stdout;
        self
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    fn host(&self) -> &str {
        &self.name
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let mut st = self.state();
        st.log.push(command.to_string());
        if st.offline {
            return Err(ExecError::Connect {
                address: format!("{}:22", self.name),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.interpret(&mut st, command))
    }

    async fn copy_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        _mode: &str,
    ) -> Result<(), ExecError> {
        let contents = std::fs::read_to_string(local_path)?;
        let mut st = self.state();
        st.log.push(format!("copy {remote_path}"));
        if st.offline {
            return Err(ExecError::Connect {
                address: format!("{}:22", self.name),
                message: "connection refused".to_string(),
            });
        }
        if st.fail_commands {
            return Err(ExecError::Copy {
                local: local_path.display().to_string(),
                remote: remote_path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        st.files.insert(remote_path.to_string(), contents);
        Ok(())
    }
}
