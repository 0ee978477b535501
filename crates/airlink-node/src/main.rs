//! airlink node: entry point.
//!
//! Brings a (simulated) radio link up, opens the discovery sockets on the
//! host's real network stack and runs one of the node's commands.
//!
//! # Usage
//!
//! ```text
//! airlink-node [--config PATH] <COMMAND>
//!
//! Commands:
//!   scan      List visible networks, strongest first
//!   connect   Join the configured network and acquire an address
//!   soft-ap   Start the configured access point
//!   beacon    Bring the link up and announce the node until Ctrl+C
//!   probe     Send one payload to a peer over TCP and print the answer
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable         | Description                                        |
//! |------------------|----------------------------------------------------|
//! | `AIRLINK_CONFIG` | Configuration file (default: platform config dir)  |
//! | `RUST_LOG`       | Log filter; overrides `[node] log_level`           |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use airlink_core::wifi::WifiTimings;
use airlink_core::{DiscoveryTransport, UnicastTransport, WifiController, WifiError};
use airlink_node::application::beacon::DiscoveryBeacon;
use airlink_node::application::bring_up::{LinkBringUp, LinkPlan};
use airlink_node::application::probe::probe;
use airlink_node::infrastructure::storage::config::LinkMode;
use airlink_node::infrastructure::storage::{load_config, load_config_from, NodeConfig};
use airlink_node::infrastructure::{HostPlatform, HostSocketStack, SimulatedRadio};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// airlink host node.
#[derive(Debug, Parser)]
#[command(
    name = "airlink-node",
    about = "Link bring-up and network discovery for airlink devices",
    version
)]
struct Cli {
    /// Configuration file.  Missing files fall back to built-in defaults.
    #[arg(long, env = "AIRLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// List visible networks, strongest first.
    Scan {
        /// Maximum number of networks to print.
        #[arg(long, default_value_t = 16)]
        max: usize,
    },
    /// Join the `[wifi]` network and acquire an address.
    Connect,
    /// Start the `[soft_ap]` access point.
    SoftAp,
    /// Bring the link up and announce the node until Ctrl+C.
    Beacon {
        /// Stop after this many rounds.
        #[arg(long)]
        count: Option<u32>,
    },
    /// Send one payload to a peer over TCP and print the answer.
    Probe {
        peer: SocketAddr,
        #[arg(long, default_value = "airlink-probe")]
        payload: String,
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Host collaborators shared by every command.
struct Host {
    stack: Arc<HostSocketStack>,
    platform: Arc<HostPlatform>,
    radio: Arc<SimulatedRadio>,
}

impl Host {
    fn new(config: &NodeConfig) -> Self {
        Self {
            stack: Arc::new(HostSocketStack::new()),
            platform: Arc::new(HostPlatform::new()),
            radio: Arc::new(SimulatedRadio::new(
                config.node.device_id,
                config.radio.clone(),
            )),
        }
    }

    fn wifi(&self, config: &NodeConfig) -> WifiController {
        WifiController::new(self.radio.clone(), self.platform.clone())
            .with_timings(wifi_timings(config))
    }

    fn bring_up(&self, config: &NodeConfig) -> LinkBringUp {
        LinkBringUp::new(
            self.wifi(config),
            DiscoveryTransport::new(self.stack.clone(), self.platform.clone()),
        )
    }
}

/// Controller timings with the configured connect budget.
fn wifi_timings(config: &NodeConfig) -> WifiTimings {
    WifiTimings {
        connect_timeout: config.wifi.connect_timeout(),
        ..WifiTimings::default()
    }
}

/// Bring-up plan for `mode`, regardless of the configured mode.
fn plan_for(config: &NodeConfig, mode: LinkMode) -> LinkPlan {
    let mut config = config.clone();
    config.node.mode = mode;
    LinkPlan::from_config(&config)
}

fn run(command: Command, config: NodeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let host = Host::new(&config);

    match command {
        Command::Scan { max } => {
            let wifi = host.wifi(&config);
            let printed = match wifi.scan(max, |record| {
                println!(
                    "{:>4}  {}  {:<5} {:<5} {}",
                    record.rssi,
                    record.bssid_string(),
                    format!("{:?}", record.security).to_lowercase(),
                    format!("{:?}", record.cipher).to_lowercase(),
                    record.ssid
                );
            }) {
                Ok(n) => n,
                Err(WifiError::NoNetworks) => 0,
                Err(e) => return Err(e).context("scan failed"),
            };
            info!("scan: {printed} networks listed");
        }

        Command::Connect | Command::SoftAp => {
            let mode = if command == Command::Connect {
                LinkMode::Station
            } else {
                LinkMode::SoftAp
            };
            let mut node = host.bring_up(&config);
            let report = node
                .run(&plan_for(&config, mode))
                .context("link bring-up failed")?;
            println!(
                "{} netmask {} gateway {} ({}), discovery ipv4={} ipv6={}",
                report.address.address,
                report.address.netmask,
                report.address.gateway,
                report.state,
                report.families.ipv4,
                report.families.ipv6
            );
            node.shut_down();
        }

        Command::Beacon { count } => {
            let mut node = host.bring_up(&config);
            node.run(&LinkPlan::from_config(&config))
                .context("link bring-up failed")?;

            let beacon = DiscoveryBeacon::from_config(&config.discovery);
            let result = beacon.run(node.discovery_mut(), &running, count);
            node.shut_down();

            let stats = result.context("beacon stopped")?;
            println!(
                "{} rounds, {} sent, {} failed, {} answers ({} bytes)",
                stats.rounds,
                stats.sent,
                stats.send_failures,
                stats.responses,
                stats.bytes_received
            );
        }

        Command::Probe {
            peer,
            payload,
            timeout_ms,
        } => {
            let mut transport = UnicastTransport::new(host.stack.clone(), host.platform.clone());
            let answer = probe(
                &mut transport,
                peer,
                payload.as_bytes(),
                Duration::from_millis(timeout_ms),
            )
            .with_context(|| format!("probe of {peer} failed"))?;
            println!("{}", String::from_utf8_lossy(&answer));
        }
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap`.
/// 2. The configuration is loaded (defaults if the file does not exist).
/// 3. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to
///    `[node] log_level`.
/// 4. A Ctrl+C handler clears a shared `AtomicBool`.
/// 5. The command runs on a blocking thread, since the transports block on
///    socket readiness.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, stopping");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let command = cli.command;
    tokio::task::spawn_blocking(move || run(command, config, running))
        .await
        .context("node task panicked")??;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
