//! LinkBringUp: association, then an address, then the discovery sockets.
//!
//! # Ordering (for beginners)
//!
//! Each step needs the previous one:
//!
//! 1. The radio must be associated (station) or serving (soft AP) before a
//!    lease can be requested.
//! 2. An address must exist before sockets can be bound to it.
//! 3. The discovery transport opens whichever of IPv4/IPv6 it can.
//!
//! A soft AP that is up but has no client yet is still usable for
//! discovery, so a client-wait timeout is only logged.

use std::time::Duration;

use airlink_core::transport::MulticastFamilies;
use airlink_core::{
    CipherType, ConnectState, DiscoveryTransport, IpConfig, SecurityType, TransportError,
    WifiController, WifiError,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::infrastructure::storage::config::{LinkMode, NodeConfig};

/// Error type for link bring-up.  Each variant names the step that failed.
#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("association failed: {0}")]
    Association(#[source] WifiError),
    #[error("address acquisition failed: {0}")]
    Address(#[source] WifiError),
    #[error("discovery bring-up failed: {0}")]
    Discovery(#[from] TransportError),
}

/// How the radio should join the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPlan {
    /// Associate with an existing network and lease an address over DHCP.
    Station {
        ssid: String,
        security: SecurityType,
        cipher: CipherType,
        passphrase: String,
        dhcp_timeout: Duration,
    },
    /// Serve an access point and wait for one client.
    SoftAp {
        ssid: String,
        hidden: bool,
        passphrase: Option<String>,
        client_timeout: Duration,
    },
}

impl LinkPlan {
    /// Builds the plan selected by `[node] mode`.
    pub fn from_config(config: &NodeConfig) -> Self {
        match config.node.mode {
            LinkMode::Station => Self::Station {
                ssid: config.wifi.ssid.clone(),
                security: config.wifi.security,
                cipher: config.wifi.cipher,
                passphrase: config.wifi.passphrase.clone(),
                dhcp_timeout: config.wifi.dhcp_timeout(),
            },
            LinkMode::SoftAp => Self::SoftAp {
                ssid: config.soft_ap.ssid.clone(),
                hidden: config.soft_ap.hidden,
                passphrase: config.soft_ap.passphrase.clone(),
                client_timeout: config.soft_ap.client_timeout(),
            },
        }
    }
}

/// Outcome of a successful bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    pub address: IpConfig,
    pub families: MulticastFamilies,
    pub state: ConnectState,
}

/// Owns the controller and the discovery transport for the node's lifetime.
pub struct LinkBringUp {
    wifi: WifiController,
    discovery: DiscoveryTransport,
}

impl LinkBringUp {
    pub fn new(wifi: WifiController, discovery: DiscoveryTransport) -> Self {
        Self { wifi, discovery }
    }

    /// Runs the three bring-up steps in order.
    ///
    /// # Errors
    ///
    /// Returns [`BringUpError`] naming the first step that failed.  Nothing
    /// later is attempted.
    pub fn run(&mut self, plan: &LinkPlan) -> Result<LinkReport, BringUpError> {
        let lease_timeout = self.associate(plan)?;

        let address = self
            .wifi
            .acquire_address(lease_timeout)
            .map_err(BringUpError::Address)?;

        let families = self.discovery.multicast_up()?;

        let report = LinkReport {
            address,
            families,
            state: self.wifi.state(),
        };
        info!(
            "link up: {} ({}), discovery ipv4={} ipv6={}",
            report.address.address, report.state, families.ipv4, families.ipv6
        );
        Ok(report)
    }

    /// Step 1.  Returns the budget for the address step.
    fn associate(&self, plan: &LinkPlan) -> Result<Duration, BringUpError> {
        match plan {
            LinkPlan::Station {
                ssid,
                security,
                cipher,
                passphrase,
                dhcp_timeout,
            } => {
                self.wifi
                    .connect(ssid, *security, *cipher, passphrase)
                    .map_err(BringUpError::Association)?;
                Ok(*dhcp_timeout)
            }
            LinkPlan::SoftAp {
                ssid,
                hidden,
                passphrase,
                client_timeout,
            } => {
                match self
                    .wifi
                    .enable_soft_ap(ssid, *hidden, passphrase.as_deref(), *client_timeout)
                {
                    Ok(()) => {}
                    Err(WifiError::Timeout { waited }) => {
                        warn!("soft AP {ssid:?} has no client after {waited:?}, continuing");
                    }
                    Err(e) => return Err(BringUpError::Association(e)),
                }
                Ok(Duration::ZERO)
            }
        }
    }

    pub fn wifi(&self) -> &WifiController {
        &self.wifi
    }

    pub fn discovery_mut(&mut self) -> &mut DiscoveryTransport {
        &mut self.discovery
    }

    /// Closes the discovery sockets and drops the association.
    pub fn shut_down(&mut self) {
        self.discovery.multicast_down();
        if let Err(e) = self.wifi.disconnect() {
            warn!("shutdown: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
