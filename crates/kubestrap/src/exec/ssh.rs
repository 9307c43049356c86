//! SSH-backed [`RemoteExecutor`].
//!
//! Two transports: the system `ssh` binary, or an in-process libssh2
//! session. The process-wide default is chosen once by
//! [`crate::runtime::init`]; native is faster and is the default.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{redact_secrets, shell_quote, CommandOutput, ExecError, HostIdentity, RemoteExecutor};

/// Connect timeout for new sessions.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Pause between polls when neither output stream has data.
const DRAIN_IDLE: Duration = Duration::from_millis(5);

/// Which SSH implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SshClientKind {
    /// Shell out to the system `ssh` binary.
    External,
    /// In-process libssh2 session.
    #[default]
    Native,
}

impl fmt::Display for SshClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Native => write!(f, "native"),
        }
    }
}

impl FromStr for SshClientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external" => Ok(Self::External),
            "native" => Ok(Self::Native),
            _ => Err(format!("Unknown SSH client: {s}. Supported: external, native")),
        }
    }
}

/// Executes commands on a host over SSH.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: HostIdentity,
    client: SshClientKind,
    connect_timeout: Duration,
}

impl SshExecutor {
    /// Executor using an explicit transport.
    #[must_use]
    pub fn new(host: HostIdentity, client: SshClientKind) -> Self {
        Self {
            host,
            client,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    /// Executor using the process-wide default transport.
    #[must_use]
    pub fn with_default_client(host: HostIdentity) -> Self {
        Self::new(host, crate::runtime::default_ssh_client())
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn identity(&self) -> &HostIdentity {
        &self.host
    }

    #[must_use]
    pub fn client(&self) -> SshClientKind {
        self.client
    }

    fn external_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=quiet".to_string(),
            "-o".to_string(),
            "PasswordAuthentication=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-p".to_string(),
            self.host.port.to_string(),
        ];
        if let Some(key) = &self.host.key_path {
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.host.user, self.host.address));
        args
    }

    async fn run_external(&self, command: &str, stdin: Option<Vec<u8>>) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.external_args())
            .arg("--")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn()?;
        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&data).await?;
            pipe.shutdown().await?;
        }
        let output = child.wait_with_output().await?;

        // ssh reserves 255 for its own failures.
        let exit_code = output.status.code().ok_or(ExecError::NoExitStatus)?;
        if exit_code == 255 {
            return Err(ExecError::Connect {
                address: self.host.socket_address(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
        })
    }

    async fn run_native(&self, command: &str, stdin: Option<Vec<u8>>) -> Result<CommandOutput, ExecError> {
        let host = self.host.clone();
        let timeout = self.connect_timeout;
        let command = command.to_string();
        tokio::task::spawn_blocking(move || native_exec(&host, timeout, &command, stdin.as_deref()))
            .await
            .map_err(|e| ExecError::Io(std::io::Error::other(e)))?
    }

    async fn run_with_stdin(&self, command: &str, stdin: Option<Vec<u8>>) -> Result<CommandOutput, ExecError> {
        match self.client {
            SshClientKind::External => self.run_external(command, stdin).await,
            SshClientKind::Native => self.run_native(command, stdin).await,
        }
    }
}

fn native_session(host: &HostIdentity, timeout: Duration) -> Result<ssh2::Session, ExecError> {
    let address = host.socket_address();
    let connect_error = |message: String| ExecError::Connect {
        address: address.clone(),
        message,
    };

    let socket = address
        .to_socket_addrs()
        .map_err(|e| connect_error(e.to_string()))?
        .next()
        .ok_or_else(|| connect_error("address did not resolve".to_string()))?;
    let tcp = TcpStream::connect_timeout(&socket, timeout).map_err(|e| connect_error(e.to_string()))?;

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| connect_error(e.to_string()))?;

    let auth = match &host.key_path {
        Some(key) => session.userauth_pubkey_file(&host.user, None, key, None),
        None => session.userauth_agent(&host.user),
    };
    auth.map_err(|e| ExecError::Auth {
        user: host.user.clone(),
        message: e.to_string(),
    })?;

    Ok(session)
}

fn native_exec(
    host: &HostIdentity,
    timeout: Duration,
    command: &str,
    stdin: Option<&[u8]>,
) -> Result<CommandOutput, ExecError> {
    let session = native_session(host, timeout)?;
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    if let Some(data) = stdin {
        channel.write_all(data)?;
    }
    channel.send_eof()?;

    // A command that fills the stderr window stalls until stderr is read,
    // so both streams are read as data arrives.
    session.set_blocking(false);
    let drained = drain_interleaved(&mut channel.stream(0), &mut channel.stderr(), || {
        std::thread::sleep(DRAIN_IDLE);
    });
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code,
    })
}

enum Chunk {
    Data,
    Pending,
    Closed,
}

fn read_chunk(source: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> std::io::Result<Chunk> {
    match source.read(buf) {
        Ok(0) => Ok(Chunk::Closed),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(Chunk::Data)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            Ok(Chunk::Pending)
        }
        Err(e) => Err(e),
    }
}

/// Read two non-blocking streams until both are closed, calling `idle`
/// whenever neither had data ready.
fn drain_interleaved(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    mut idle: impl FnMut(),
) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let (mut out_open, mut err_open) = (true, true);
    let mut buf = [0u8; 16 * 1024];

    while out_open || err_open {
        let mut progressed = false;
        if out_open {
            match read_chunk(stdout, &mut buf, &mut out)? {
                Chunk::Data => progressed = true,
                Chunk::Pending => {}
                Chunk::Closed => out_open = false,
            }
        }
        if err_open {
            match read_chunk(stderr, &mut buf, &mut err)? {
                Chunk::Data => progressed = true,
                Chunk::Pending => {}
                Chunk::Closed => err_open = false,
            }
        }
        if !progressed && (out_open || err_open) {
            idle();
        }
    }
    Ok((out, err))
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn host(&self) -> &str {
        &self.host.name
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        debug!(
            host = %self.host.name,
            client = %self.client,
            command = %redact_secrets(command),
            "ssh run"
        );
        self.run_with_stdin(command, None).await
    }

    async fn copy_file(&self, local_path: &Path, remote_path: &str, mode: &str) -> Result<(), ExecError> {
        let contents = tokio::fs::read(local_path).await?;
        let dir = match remote_path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir,
            _ => "/",
        };
        let target = shell_quote(remote_path);
        let command = format!(
            "sudo mkdir -p {} && sudo tee {target} >/dev/null && sudo chmod {} {target}",
            shell_quote(dir),
            shell_quote(mode),
        );

        debug!(
            host = %self.host.name,
            local = %local_path.display(),
            remote = remote_path,
            bytes = contents.len(),
            "ssh copy"
        );

        let output = self.run_with_stdin(&command, Some(contents)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ExecError::Copy {
                local: local_path.display().to_string(),
                remote: remote_path.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use super::*;

    /// Non-blocking stream replaying a script; `None` means nothing ready.
    struct Scripted {
        steps: VecDeque<Option<&'static [u8]>>,
        /// Bytes read so far, shared with the other stream of the channel.
        consumed: Rc<Cell<usize>>,
        /// Stay pending until the other stream consumed this many bytes.
        after: usize,
        other: Rc<Cell<usize>>,
    }

    impl Scripted {
        fn new(steps: Vec<Option<&'static [u8]>>) -> Self {
            Self {
                steps: steps.into(),
                consumed: Rc::new(Cell::new(0)),
                after: 0,
                other: Rc::new(Cell::new(0)),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.other.get() < self.after {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            match self.steps.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                Some(Some(data)) => {
                    buf[..data.len()].copy_from_slice(data);
                    self.consumed.set(self.consumed.get() + data.len());
                    Ok(data.len())
                }
            }
        }
    }

    #[test]
    fn test_client_kind_parse() {
        assert_eq!("native".parse::<SshClientKind>(), Ok(SshClientKind::Native));
        assert_eq!(
            "External".parse::<SshClientKind>(),
            Ok(SshClientKind::External)
        );
        assert!("putty".parse::<SshClientKind>().is_err());
        assert_eq!(SshClientKind::default(), SshClientKind::Native);
    }

    #[test]
    fn test_external_args_include_key_and_port() {
        let host = HostIdentity::new("cp-1", "192.168.49.2")
            .with_port(32772)
            .with_user("docker")
            .with_key("/home/me/.kubestrap/machines/cp-1/id_rsa");
        let exec = SshExecutor::new(host, SshClientKind::External);
        let args = exec.external_args();

        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "32772"));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-i" && w[1].ends_with("id_rsa")));
        assert_eq!(args.last().map(String::as_str), Some("docker@192.168.49.2"));
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_waits() {
        // stdout only produces once stderr has been drained, as a remote
        // command does when its stderr window is full.
        let mut stderr = Scripted::new(vec![Some(&b"warn 1\n"[..]), None, Some(&b"warn 2\n"[..])]);
        let mut stdout = Scripted::new(vec![None, Some(&b"done\n"[..])]);
        stdout.after = 14;
        stdout.other = stderr.consumed.clone();
        stderr.other = stdout.consumed.clone();

        let mut idles = 0;
        let (out, err) = drain_interleaved(&mut stdout, &mut stderr, || idles += 1).unwrap();

        assert_eq!(out, b"done\n");
        assert_eq!(err, b"warn 1\nwarn 2\n");
        assert!(idles >= 1);
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }

        let mut stdout = Scripted::new(vec![Some(&b"partial"[..])]);
        let err = drain_interleaved(&mut stdout, &mut Broken, || {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_external_args_without_key_use_agent() {
        let exec = SshExecutor::new(
            HostIdentity::new("node", "10.0.0.5"),
            SshClientKind::External,
        );
        assert!(!exec.external_args().iter().any(|a| a == "-i"));
    }
}
