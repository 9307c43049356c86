//! kubestrap CLI - bring up and manage a Kubernetes control plane over SSH.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubestrap::bootstrapper::LogOptions;
use kubestrap::registry::{self, StrategyContext, StrategyRegistry};
use kubestrap::{
    runtime, ClusterConfig, HostIdentity, KubernetesVersion, NodeConfig, RemoteExecutor, Settings,
    SshExecutor,
};

/// kubestrap - pluggable Kubernetes control-plane bootstrapper.
#[derive(Parser)]
#[command(name = "kubestrap")]
#[command(about = "Bootstrap and manage a Kubernetes control plane on a remote host")]
struct Cli {
    /// Settings file (defaults to ./kubestrap.toml when present).
    #[arg(long, env = "KUBESTRAP_SETTINGS")]
    settings: Option<PathBuf>,

    /// Bootstrapper to use (overrides settings).
    #[arg(long)]
    strategy: Option<String>,

    /// Cluster configuration file, YAML or JSON (overrides settings).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available bootstrappers.
    Strategies,

    /// Initialize the control plane described by the cluster configuration.
    Init {
        /// Also wait for the control plane to become ready.
        #[arg(long, default_value = "false")]
        wait: bool,
    },

    /// Wait for the control plane to become ready.
    Wait {
        /// Timeout in seconds (defaults to the configured readiness timeout).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Join another node to the cluster.
    Join {
        /// Node name.
        #[arg(long)]
        name: String,

        /// Node SSH address.
        #[arg(long)]
        address: String,

        /// Join as an additional control-plane node.
        #[arg(long, default_value = "false")]
        control_plane: bool,

        /// SSH port on the node.
        #[arg(long, default_value = "22")]
        ssh_port: u16,

        /// SSH user on the node (defaults to the control-plane host's user).
        #[arg(long)]
        user: Option<String>,

        /// SSH private key for the node (defaults to the control-plane host's key).
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Upgrade the control plane to a Kubernetes version.
    Upgrade {
        /// Target version (e.g. 1.29.0).
        version: String,
    },

    /// Remove control-plane state from the host.
    Teardown,

    /// Show cluster status.
    Status {
        /// Print JSON.
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Print or collect diagnostic logs.
    Logs {
        /// Lines per source.
        #[arg(long, default_value = "60")]
        lines: u32,

        /// Run the commands on the host and print their output.
        #[arg(long, default_value = "false")]
        collect: bool,
    },

    /// Show where the bootstrapper keeps its files on the host.
    Paths,
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling...");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.settings.as_deref()).context("Failed to load settings")?;
    if cli.verbose {
        settings.log.verbose = true;
    }
    if let Some(strategy) = cli.strategy {
        settings.strategy = strategy;
    }
    if let Some(path) = cli.config {
        settings.cluster_config = Some(path);
    }

    runtime::init(&settings.process_settings()).context("Failed to initialize")?;

    if matches!(cli.command, Commands::Strategies) {
        for name in StrategyRegistry::builtin().names() {
            println!("{name}");
        }
        return Ok(());
    }

    // Reject unknown strategies before touching the network.
    StrategyRegistry::builtin().validate(&settings.strategy)?;

    let cluster_config = settings
        .cluster_config
        .as_deref()
        .map(|path| {
            ClusterConfig::from_path(path)
                .with_context(|| format!("Failed to load cluster config {}", path.display()))
        })
        .transpose()?;

    let host = settings.host_identity()?;
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::with_default_client(host.clone()));

    let mut context =
        StrategyContext::new(executor.clone()).with_settings(settings.strategy_settings());
    if let Some(config) = &cluster_config {
        context = context.with_base_config(config.clone());
    }
    let bootstrapper = registry::select(&settings.strategy, context)?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Strategies => {}

        Commands::Init { wait } => {
            let Some(config) = &cluster_config else {
                bail!("init needs a cluster configuration (--config or cluster_config setting)");
            };
            bootstrapper.initialize_control_plane(config).await?;
            println!("\n✅ Control plane initialized on {}", host.name);
            if wait {
                bootstrapper
                    .wait_until_ready(settings.readiness_timeout(), &cancel)
                    .await?;
                println!("✅ Control plane ready");
            }
        }

        Commands::Wait { timeout } => {
            let timeout = timeout.map_or_else(|| settings.readiness_timeout(), Duration::from_secs);
            bootstrapper.wait_until_ready(timeout, &cancel).await?;
            println!("\n✅ Control plane ready on {}", host.name);
        }

        Commands::Join {
            name,
            address,
            control_plane,
            ssh_port,
            user,
            key,
        } => {
            let mut node_host = HostIdentity::new(name.clone(), address.clone())
                .with_port(ssh_port)
                .with_user(user.unwrap_or_else(|| host.user.clone()));
            if let Some(key) = key.or_else(|| host.key_path.clone()) {
                node_host = node_host.with_key(key);
            }
            let node_executor = SshExecutor::with_default_client(node_host);

            let node = if control_plane {
                NodeConfig::control_plane(name)
            } else {
                NodeConfig::worker(name)
            }
            .with_address(address);

            info!("Joining {} via {}", node.name, host.name);
            bootstrapper.join_node(&node, &node_executor).await?;
            println!("\n✅ Node {} joined", node.name);
        }

        Commands::Upgrade { version } => {
            let target: KubernetesVersion = version
                .parse()
                .with_context(|| format!("Invalid Kubernetes version: {version}"))?;
            bootstrapper.upgrade(&target, &cancel).await?;
            println!("\n✅ Control plane at {target}");
        }

        Commands::Teardown => {
            let report = bootstrapper.tear_down().await;
            println!("\nTear-down of {}:", host.name);
            print!("{report}");
            if !report.is_clean() {
                bail!(
                    "tear-down incomplete: {}",
                    report.failed_steps().join(", ")
                );
            }
            println!("✅ Control plane destroyed");
        }

        Commands::Status { json } => {
            let status = bootstrapper.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("\nCluster on {}:", host.name);
                println!("  State:     {}", status.state);
                println!("  Apiserver: {}", status.apiserver);
                println!("  Kubelet:   {}", status.kubelet);
                for (component, version) in &status.components {
                    println!("  {component:<24} {version}");
                }
            }
        }

        Commands::Logs { lines, collect } => {
            let bundle = bootstrapper.log_commands(LogOptions {
                lines,
                follow: false,
            });
            if collect {
                for (source, output) in bundle.collect(executor.as_ref()).await {
                    println!("==> {source} <==");
                    println!("{output}");
                }
            } else {
                for (source, command) in &bundle.commands {
                    println!("{source:<24} {command}");
                }
            }
        }

        Commands::Paths => {
            let paths = bootstrapper.config_paths();
            println!("\nFiles on {}:", host.name);
            println!("  Bootstrap config: {}", paths.bootstrap_config);
            println!("  Kubelet unit:     {}", paths.kubelet_unit);
            println!("  Network config:   {}", paths.network_config);
            println!("  Admin kubeconfig: {}", paths.admin_kubeconfig);
            println!("  Manifests:        {}", paths.manifests_dir);
            println!("  PKI:              {}", paths.pki_dir);
        }
    }

    Ok(())
}
