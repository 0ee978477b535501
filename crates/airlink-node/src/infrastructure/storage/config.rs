//! TOML-based configuration for the node.
//!
//! Reads and writes `NodeConfig` from the platform-appropriate config file:
//! - Linux:    `$XDG_CONFIG_HOME/airlink/config.toml` (or `~/.config/airlink/`)
//! - macOS:    `~/Library/Application Support/Airlink/config.toml`
//! - Windows:  `%APPDATA%\Airlink\config.toml`
//!
//! The binary's `--config` flag overrides the location.
//!
//! # Example
//!
//! ```toml
//! [node]
//! log_level = "debug"
//! mode = "station"
//!
//! [wifi]
//! ssid = "workshop"
//! security = "wpa2"
//! cipher = "ccmp"
//! passphrase = "correct horse"
//!
//! [discovery]
//! beacon_interval_ms = 2000
//! payload = "airlink-node hello"
//!
//! [[radio.networks]]
//! ssid = "workshop"
//! rssi = 70
//! security = "wpa2"
//! cipher = "ccmp"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]` (or `#[serde(default)]`),
//! so the node runs with no file at all and older files missing newer keys
//! keep working.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use airlink_core::{CipherType, SecurityType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub wifi: WifiSection,
    #[serde(default)]
    pub soft_ap: SoftApSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub radio: RadioSection,
}

/// How the node attaches to the network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMode {
    /// Join an existing network (`[wifi]`).
    #[default]
    Station,
    /// Host an access point (`[soft_ap]`).
    SoftAp,
}

/// General node settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Radio device id; link callbacks for other ids are ignored.
    #[serde(default)]
    pub device_id: u8,
    #[serde(default)]
    pub mode: LinkMode,
}

/// Station-mode association settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WifiSection {
    #[serde(default = "default_ssid")]
    pub ssid: String,
    #[serde(default)]
    pub security: SecurityType,
    #[serde(default)]
    pub cipher: CipherType,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_dhcp_timeout_ms")]
    pub dhcp_timeout_ms: u64,
}

/// Access-point settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoftApSection {
    #[serde(default = "default_ap_ssid")]
    pub ssid: String,
    #[serde(default)]
    pub hidden: bool,
    /// Absent or empty means an open access point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

/// Discovery beacon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Longest single wait for a reply.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// Time between beacons.
    #[serde(default = "default_beacon_interval_ms")]
    pub beacon_interval_ms: u64,
    #[serde(default = "default_payload")]
    pub payload: String,
}

/// One network the simulated radio can see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimNetwork {
    pub ssid: String,
    #[serde(default = "default_rssi")]
    pub rssi: u8,
    #[serde(default)]
    pub security: SecurityType,
    #[serde(default)]
    pub cipher: CipherType,
    /// Passphrase the simulated AP accepts.  Ignored for open networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Behaviour of the simulated radio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadioSection {
    /// Networks returned by scans and accepted by `connect`.
    #[serde(default = "default_networks")]
    pub networks: Vec<SimNetwork>,
    /// Delay before link notifications fire.
    #[serde(default = "default_link_delay_ms")]
    pub link_delay_ms: u64,
    /// Delay between a DHCP request and the lease appearing.
    #[serde(default = "default_lease_delay_ms")]
    pub lease_delay_ms: u64,
    #[serde(default = "default_lease_address")]
    pub lease_address: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    #[serde(default = "default_gateway")]
    pub gateway: Ipv4Addr,
    /// Whether a client joins the soft AP once it is up.
    #[serde(default = "default_true")]
    pub ap_client_joins: bool,
    #[serde(default = "default_ap_client_delay_ms")]
    pub ap_client_delay_ms: u64,
}

impl WifiSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dhcp_timeout(&self) -> Duration {
        Duration::from_millis(self.dhcp_timeout_ms)
    }
}

impl SoftApSection {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl DiscoverySection {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_ssid() -> String {
    "airlink".to_string()
}
fn default_ap_ssid() -> String {
    "airlink-setup".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_dhcp_timeout_ms() -> u64 {
    5_000
}
fn default_client_timeout_ms() -> u64 {
    30_000
}
fn default_recv_timeout_ms() -> u64 {
    500
}
fn default_beacon_interval_ms() -> u64 {
    2_000
}
fn default_payload() -> String {
    "airlink-node".to_string()
}
fn default_rssi() -> u8 {
    50
}
fn default_networks() -> Vec<SimNetwork> {
    vec![SimNetwork {
        ssid: default_ssid(),
        rssi: default_rssi(),
        security: SecurityType::None,
        cipher: CipherType::None,
        passphrase: None,
    }]
}
fn default_link_delay_ms() -> u64 {
    50
}
fn default_lease_delay_ms() -> u64 {
    250
}
fn default_lease_address() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, 50)
}
fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}
fn default_gateway() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, 1)
}
fn default_true() -> bool {
    true
}
fn default_ap_client_delay_ms() -> u64 {
    1_000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_id: 0,
            mode: LinkMode::default(),
        }
    }
}

impl Default for WifiSection {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            security: SecurityType::None,
            cipher: CipherType::None,
            passphrase: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dhcp_timeout_ms: default_dhcp_timeout_ms(),
        }
    }
}

impl Default for SoftApSection {
    fn default() -> Self {
        Self {
            ssid: default_ap_ssid(),
            hidden: false,
            passphrase: None,
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            recv_timeout_ms: default_recv_timeout_ms(),
            beacon_interval_ms: default_beacon_interval_ms(),
            payload: default_payload(),
        }
    }
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            link_delay_ms: default_link_delay_ms(),
            lease_delay_ms: default_lease_delay_ms(),
            lease_address: default_lease_address(),
            netmask: default_netmask(),
            gateway: default_gateway(),
            ap_client_joins: default_true(),
            ap_client_delay_ms: default_ap_client_delay_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `NodeConfig` from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `NodeConfig` from `path`, returning `NodeConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Airlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("airlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Airlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
