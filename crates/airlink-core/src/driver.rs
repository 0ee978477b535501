//! Collaborator interfaces: everything the core needs from the platform.
//!
//! The transports and the Wi-Fi controller never touch an OS API directly.
//! They talk to three traits:
//!
//! - [`SocketStack`] – BSD-style socket primitives offered by the network
//!   stack (create, bind, connect, send, receive, readiness wait, close).
//! - [`WlanDriver`] – the radio driver: association control, security
//!   parameters, scanning, soft-AP and the DHCP client.
//! - [`Platform`] – sleeping, randomness, a monotonic clock and the entropy
//!   hook.
//!
//! # Testability
//!
//! All three traits are object-safe and are held as `Arc<dyn Trait>`, so unit
//! tests substitute `mockall` mocks and the node binary substitutes host
//! implementations without the core changing.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// ── Sockets ───────────────────────────────────────────────────────────────────

/// Opaque socket identifier issued by a [`SocketStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub u32);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock#{}", self.0)
    }
}

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of a socket address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::V4,
            SocketAddr::V6(_) => Self::V6,
        }
    }
}

/// Transport kind of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Reliable byte stream (TCP).
    Stream,
    /// Datagram (UDP).
    Datagram,
}

/// Socket options the core sets through [`SocketStack::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// `SO_LINGER`.  `enabled: true, seconds: 0` closes without lingering.
    Linger { enabled: bool, seconds: u16 },
    /// Join an IPv4 multicast group on the given local interface address.
    JoinMulticastV4 { group: Ipv4Addr, interface: Ipv4Addr },
    /// Join an IPv6 multicast group on the interface owning `interface`.
    JoinMulticastV6 { group: Ipv6Addr, interface: Ipv6Addr },
}

/// Error reported by the network stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    /// The stack is temporarily out of packet buffers; the call may be retried.
    #[error("network stack temporarily out of buffers")]
    NoBufferSpace,
    /// The peer closed the connection or the socket was closed locally.
    #[error("socket closed")]
    Closed,
    /// The stack does not implement the requested operation or option.
    #[error("operation not supported by the network stack")]
    Unsupported,
    /// Any other negative status returned by the stack.
    #[error("network stack error {0}")]
    Code(i32),
}

impl StackError {
    /// `true` for conditions that clear on their own and should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoBufferSpace)
    }
}

/// Result of a readiness wait: bit `i` is set when `watch[i]` is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadySet(u8);

impl ReadySet {
    /// Maximum number of sockets a single wait can watch.
    pub const MAX_WATCH: usize = 8;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a set from the indices of ready sockets.
    pub fn from_indices(indices: &[usize]) -> Self {
        let mut set = Self::empty();
        for &i in indices {
            set.insert(i);
        }
        set
    }

    pub fn insert(&mut self, index: usize) {
        if index < Self::MAX_WATCH {
            self.0 |= 1 << index;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < Self::MAX_WATCH && self.0 & (1 << index) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}

/// Socket primitives of the underlying network stack.
///
/// Every call is blocking except [`select`](SocketStack::select), which blocks
/// for at most `timeout`.  Closing a socket from another thread must wake a
/// `select` that is watching it.
#[cfg_attr(test, mockall::automock)]
pub trait SocketStack: Send + Sync {
    /// Creates an unbound, unconnected socket.
    fn socket(&self, family: AddressFamily, kind: SocketKind) -> Result<SocketHandle, StackError>;

    /// Binds a datagram socket to a local address.
    fn bind(&self, sock: SocketHandle, local: SocketAddr) -> Result<(), StackError>;

    /// Connects a stream socket.  Blocks until the handshake completes or fails.
    fn connect(&self, sock: SocketHandle, remote: SocketAddr) -> Result<(), StackError>;

    fn set_option(&self, sock: SocketHandle, option: SocketOption) -> Result<(), StackError>;

    /// Writes up to `data.len()` bytes; returns how many were accepted.
    fn send(&self, sock: SocketHandle, data: &[u8]) -> Result<usize, StackError>;

    /// Reads up to `buf.len()` bytes.  `Ok(0)` means the peer closed.
    fn recv(&self, sock: SocketHandle, buf: &mut [u8]) -> Result<usize, StackError>;

    fn send_to(&self, sock: SocketHandle, data: &[u8], dest: SocketAddr)
        -> Result<usize, StackError>;

    fn recv_from(
        &self,
        sock: SocketHandle,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), StackError>;

    /// Waits until at least one socket in `watch` is readable or `timeout`
    /// elapses.  An empty [`ReadySet`] means the wait timed out.
    ///
    /// Fails with [`StackError::Closed`] if a watched socket is closed before
    /// or during the wait.
    fn select(&self, watch: &[SocketHandle], timeout: Duration) -> Result<ReadySet, StackError>;

    /// Closes a socket.  Closing an unknown handle is a no-op.
    fn close(&self, sock: SocketHandle);

    /// Link-local IPv6 address of the active interface, used to pick the
    /// interface for IPv6 multicast membership.
    fn ipv6_link_local(&self) -> Result<Ipv6Addr, StackError>;
}

// ── Platform services ─────────────────────────────────────────────────────────

/// System services outside the network stack.
#[cfg_attr(test, mockall::automock)]
pub trait Platform: Send + Sync {
    fn sleep(&self, duration: Duration);

    /// Fills `buf` with random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Monotonic time since an arbitrary fixed origin.
    fn elapsed(&self) -> Duration;

    /// Mixes a few bits of timing jitter into the entropy pool.
    fn feed_entropy(&self, bits: u8);
}

// ── Radio driver ──────────────────────────────────────────────────────────────

/// Callback installed into the radio driver.  Receives the device id and the
/// raw link notification code.  Invoked from a driver-owned context.
pub type LinkCallback = Arc<dyn Fn(u8, i32) + Send + Sync>;

/// Error reported by the radio driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("radio driver error {0}")]
    Status(i32),
}

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Station,
    SoftAp,
}

/// Link-layer state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Authentication mode handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    WpaPsk,
    Wpa2Psk,
}

/// Encryption mode handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptMode {
    None,
    Wep,
    Tkip,
    Aes,
}

/// WEP authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WepAuth {
    Open,
    Shared,
    Auto,
}

/// IPv4 addressing of the interface.  An unassigned address is `0.0.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl IpConfig {
    pub const UNASSIGNED: Self = Self {
        address: Ipv4Addr::UNSPECIFIED,
        netmask: Ipv4Addr::UNSPECIFIED,
        gateway: Ipv4Addr::UNSPECIFIED,
    };

    pub fn is_assigned(&self) -> bool {
        !self.address.is_unspecified()
    }
}

impl Default for IpConfig {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

/// Cipher suites advertised in a beacon (bit flags).
pub mod cipher_suite {
    pub const WEP: u8 = 0x01;
    pub const TKIP: u8 = 0x02;
    pub const CCMP: u8 = 0x04;
}

/// One raw scan entry as stored by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssInfo {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub rssi: u8,
    pub security_enabled: bool,
    /// RSN (WPA2) authentication advertised.
    pub rsn_auth: bool,
    /// RSN cipher suites, see [`cipher_suite`].
    pub rsn_cipher: u8,
    /// WPA authentication advertised.
    pub wpa_auth: bool,
    /// WPA cipher suites, see [`cipher_suite`].
    pub wpa_cipher: u8,
}

/// Firmware identification strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub date: String,
    pub time: String,
    pub version: String,
    pub changelist: String,
}

/// Radio driver primitives.
#[cfg_attr(test, mockall::automock)]
pub trait WlanDriver: Send + Sync {
    /// Id of the radio this driver controls; callbacks for other ids are ignored.
    fn device_id(&self) -> u8;

    /// Installs the link notification callback, replacing any previous one.
    fn set_link_callback(&self, callback: LinkCallback);

    fn set_mode(&self, mode: OperatingMode);

    fn disconnect(&self) -> Result<(), DriverError>;

    fn set_wep_key(&self, slot: u8, key: &str);

    fn set_wep_key_index(&self, slot: u8);

    fn set_wep_auth(&self, auth: WepAuth);

    fn set_auth_mode(&self, mode: AuthMode);

    fn set_passphrase(&self, passphrase: &str);

    fn set_encrypt_mode(&self, mode: EncryptMode);

    fn set_ssid(&self, ssid: &str);

    /// Applies the staged configuration.  Association proceeds asynchronously.
    fn commit(&self);

    fn link_state(&self) -> LinkState;

    /// Turns the DHCP client on.
    fn enable_dhcp_client(&self);

    /// Starts a DHCP lease request.  May return the lease if it completes
    /// immediately; otherwise returns [`IpConfig::UNASSIGNED`].
    fn request_lease(&self) -> IpConfig;

    fn ip_config(&self) -> Result<IpConfig, DriverError>;

    fn set_ip_config(&self, config: IpConfig);

    fn set_hidden(&self, hidden: bool);

    /// Configures the soft-AP DHCP server pool.
    fn set_dhcp_pool(&self, start: Ipv4Addr, end: Ipv4Addr, lease: Duration);

    fn start_ap(&self, ssid: &str);

    fn start_scan(&self);

    fn scan_count(&self) -> usize;

    fn scan_entry(&self, index: usize) -> Option<BssInfo>;

    fn firmware_version(&self) -> FirmwareVersion;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
