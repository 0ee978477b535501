//! Socket transports built on fixed-size buffer pairs.
//!
//! # Sub-modules
//!
//! - **`unicast`** – [`UnicastTransport`]: one stream socket to a single peer.
//!   Sends drain the TX buffer completely, retrying on transient stack
//!   back-pressure; receives wait for readiness with a timeout and accept
//!   partial reads.
//!
//! - **`discovery`** – [`DiscoveryTransport`]: an IPv4 and an IPv6 datagram
//!   socket joined to the well-known discovery groups.  Receives multiplex
//!   both sockets with one wait; sends fan the same payload out to every
//!   group and the IPv4 broadcast address.
//!
//! Both transports implement [`NetIo`], the seam through which a
//! transport-agnostic protocol layer drives I/O without knowing which
//! sockets sit underneath.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::buffer::{BufferError, Direction, IoBuffer};
use crate::driver::{Platform, SocketHandle, SocketStack, StackError};

pub mod discovery;
pub mod unicast;

pub use discovery::{DiscoveryTransport, MulticastFamilies};
pub use unicast::UnicastTransport;

/// Receive buffer size: one full discovery packet.
///
/// 1500-byte MTU minus UDP (8), IPv4 (20) and Ethernet II (18) overhead.
pub const RX_CAPACITY: usize = 1454;

/// Transmit buffer size.
pub const TX_CAPACITY: usize = 1452;

/// Pause before retrying a send the stack refused for lack of buffers.
pub const SEND_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// First port of the IANA dynamic/private range.
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Error type for transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The requested buffer lengths do not fit the fixed buffers.
    #[error("buffer configuration rejected: {0}")]
    Resources(#[from] BufferError),
    /// The stream socket could not be created or connected.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: StackError,
    },
    /// Neither the IPv4 nor the IPv6 discovery socket could be opened.
    #[error("no multicast socket could be opened")]
    MulticastUnavailable,
    /// The operation needs an open socket and there is none.
    #[error("transport is not open")]
    NotOpen,
    /// A fatal write error.  The caller should abandon the transport.
    #[error("write failed: {0}")]
    Write(StackError),
    /// Every fan-out destination of a discovery send failed.
    #[error("all {attempted} discovery destinations failed")]
    FanOutFailed { attempted: usize },
    /// A fatal read error.
    #[error("read failed: {0}")]
    Read(StackError),
    /// No socket became readable before the timeout.
    #[error("timed out waiting for data")]
    Timeout,
}

/// Lengths to configure on a transport's buffer pair when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub rx_len: usize,
    pub tx_len: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            rx_len: RX_CAPACITY,
            tx_len: TX_CAPACITY,
        }
    }
}

/// Transport-agnostic I/O seam.
///
/// A protocol layer fills [`tx`](NetIo::tx) and calls [`send`](NetIo::send),
/// or calls [`recv`](NetIo::recv) and parses [`rx`](NetIo::rx), without
/// knowing whether a stream socket or a pair of multicast sockets is in use.
pub trait NetIo {
    /// Waits up to `timeout` for data and appends at most `max_len` bytes to
    /// the RX buffer.  Returns the number of bytes appended.
    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<usize, TransportError>;

    /// Transmits the available bytes of the TX buffer.
    fn send(&mut self) -> Result<(), TransportError>;

    fn rx(&mut self) -> &mut IoBuffer;

    fn tx(&mut self) -> &mut IoBuffer;
}

/// Socket handles owned by one transport.  `None` means "not open".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NetContext {
    pub tcp: Option<SocketHandle>,
    pub udp4: Option<SocketHandle>,
    pub udp6: Option<SocketHandle>,
}

impl NetContext {
    /// Closes every open socket and clears the handles.  Safe to call twice.
    pub fn close_all(&mut self, stack: &dyn SocketStack) {
        for sock in [self.tcp.take(), self.udp4.take(), self.udp6.take()]
            .into_iter()
            .flatten()
        {
            stack.close(sock);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tcp.is_none() && self.udp4.is_none() && self.udp6.is_none()
    }
}

/// Closes a transport's sockets from another thread.
///
/// Transport calls take `&mut self`, so a thread blocked in `recv` cannot
/// share the transport.  A `SocketCloser` taken beforehand can: closing the
/// sockets ends the blocked wait with [`TransportError::Read`] carrying
/// [`StackError::Closed`].  The transport itself stays usable and cleans up
/// normally on `disconnect` or drop.
///
/// A closer targets the sockets open when it was taken.  Closing handles
/// that are already closed does nothing.
#[derive(Clone)]
pub struct SocketCloser {
    stack: Arc<dyn SocketStack>,
    handles: Vec<SocketHandle>,
}

impl SocketCloser {
    pub(crate) fn new(stack: Arc<dyn SocketStack>, ctx: &NetContext) -> Self {
        Self {
            stack,
            handles: [ctx.tcp, ctx.udp4, ctx.udp6].into_iter().flatten().collect(),
        }
    }

    /// Closes every captured socket.  Safe to call more than once.
    pub fn close(&self) {
        for &sock in &self.handles {
            self.stack.close(sock);
        }
    }

    pub fn handles(&self) -> &[SocketHandle] {
        &self.handles
    }
}

impl fmt::Debug for SocketCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCloser")
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// The RX/TX buffer arena owned by a transport.
///
/// Allocated once when the transport is created and reconfigured (never
/// reallocated) on every open.
#[derive(Debug)]
pub(crate) struct BufferPair {
    pub rx: IoBuffer,
    pub tx: IoBuffer,
}

impl BufferPair {
    pub fn new() -> Self {
        Self {
            rx: IoBuffer::new(RX_CAPACITY, Direction::Rx),
            tx: IoBuffer::new(TX_CAPACITY, Direction::Tx),
        }
    }

    /// Applies `config` to both buffers, or to neither if either length is
    /// too large.
    pub fn configure(&mut self, config: &BufferConfig) -> Result<(), BufferError> {
        for (len, buf) in [(config.rx_len, &self.rx), (config.tx_len, &self.tx)] {
            if len > buf.max_capacity() {
                return Err(BufferError::TooSmall {
                    requested: len,
                    capacity: buf.max_capacity(),
                });
            }
        }
        self.rx.configure(config.rx_len)?;
        self.tx.configure(config.tx_len)?;
        Ok(())
    }

    pub fn release(&mut self) {
        self.rx.release();
        self.tx.release();
    }
}

/// Random port in the IANA dynamic/private range.
pub fn ephemeral_port(platform: &dyn Platform) -> u16 {
    let mut bytes = [0u8; 2];
    platform.random_bytes(&mut bytes);
    EPHEMERAL_PORT_BASE + u16::from_ne_bytes(bytes) % (u16::MAX - EPHEMERAL_PORT_BASE)
}

/// Feeds the low byte of the monotonic clock to the entropy hook.
pub(crate) fn stir_entropy(platform: &dyn Platform) {
    let bits = (platform.elapsed().as_millis() & 0xFF) as u8;
    platform.feed_entropy(bits);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
