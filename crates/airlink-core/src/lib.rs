//! # airlink-core
//!
//! Transport layer and wireless-association lifecycle for an embedded
//! network stack.
//!
//! This crate contains no OS calls.  Every platform primitive (sockets,
//! readiness waits, the radio driver, sleeping, randomness) is reached through
//! the traits in [`driver`], so the whole crate can be exercised with mocks on
//! a development machine and wired to real hardware by a thin adapter.
//!
//! # Architecture overview (for beginners)
//!
//! The crate is built leaves-first:
//!
//! - **`buffer`** – [`IoBuffer`], a fixed-capacity byte buffer with a read
//!   cursor and a write cursor.  All bytes that enter or leave the device flow
//!   through one of these.
//!
//! - **`transport`** – Two independent socket wrappers that each own an
//!   RX/TX pair of `IoBuffer`s:
//!   - [`UnicastTransport`]: one stream socket to a single peer (connect,
//!     send-with-retry, receive-with-timeout).
//!   - [`DiscoveryTransport`]: an IPv4 and an IPv6 datagram socket joined to
//!     well-known multicast groups, used to find peers on the local network.
//!
//! - **`wifi`** – The [`ConnectState`] machine that tracks whether the radio
//!   is associated, the [`WifiController`] that drives the driver through
//!   connect / soft-AP / DHCP, and scan-result ranking.
//!
//! The radio must reach [`ConnectState::ConnectOk`] (or one of the soft-AP
//! states) before an address is requested, and an address must exist before
//! either transport is opened.

pub mod buffer;
pub mod driver;
pub mod transport;
pub mod wifi;

pub use buffer::{Direction, IoBuffer};
pub use driver::{
    AddressFamily, DriverError, Platform, ReadySet, SocketHandle, SocketKind, SocketOption,
    SocketStack, StackError, WlanDriver,
};
pub use transport::{
    BufferConfig, DiscoveryTransport, NetIo, SocketCloser, TransportError, UnicastTransport,
    RX_CAPACITY, TX_CAPACITY,
};
pub use wifi::{
    CipherType, ConnectState, IpConfig, LinkEvent, ScanRecord, SecurityType, WifiController,
    WifiError,
};
