//! Discovery transport: dual-family multicast/broadcast datagram sockets.
//!
//! Peers find each other by sending small datagrams to well-known groups on
//! a well-known port.  The device keeps one IPv4 and one IPv6 datagram socket
//! so it is reachable on either family.
//!
//! # Best-effort policy
//!
//! Discovery only needs *some* path to work:
//!
//! - **Bring-up** opens each family independently.  Losing one family is a
//!   warning; losing both is [`TransportError::MulticastUnavailable`].
//! - **Send** fans the payload out to the IPv4 group, the IPv4 broadcast
//!   address and the IPv6 group.  One complete delivery is success.  The TX
//!   buffer is reset afterwards whatever the outcome; failed legs are not
//!   re-queued.
//! - **Receive** waits on both sockets at once.  When both are readable both
//!   are drained in the same call so sustained traffic on one family cannot
//!   starve the other.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::{
    ephemeral_port, stir_entropy, BufferConfig, BufferPair, NetContext, NetIo, SocketCloser,
    TransportError,
};
use crate::buffer::{Direction, IoBuffer};
use crate::driver::{
    AddressFamily, Platform, SocketHandle, SocketKind, SocketOption, SocketStack, StackError,
};

/// Well-known discovery port.
pub const DISCOVERY_PORT: u16 = 9956;

/// IPv4 discovery multicast group.
pub const IPV4_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 113);

/// IPv6 discovery multicast group (link-local scope).
pub const IPV6_MULTICAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x13a);

/// Which families came up in [`DiscoveryTransport::multicast_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MulticastFamilies {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl MulticastFamilies {
    pub fn any(&self) -> bool {
        self.ipv4 || self.ipv6
    }
}

/// Multicast and broadcast discovery over IPv4 and IPv6.
pub struct DiscoveryTransport {
    stack: Arc<dyn SocketStack>,
    platform: Arc<dyn Platform>,
    ctx: NetContext,
    buffers: BufferPair,
}

impl DiscoveryTransport {
    /// Creates a closed transport and allocates its buffers.
    pub fn new(stack: Arc<dyn SocketStack>, platform: Arc<dyn Platform>) -> Self {
        Self {
            stack,
            platform,
            ctx: NetContext::default(),
            buffers: BufferPair::new(),
        }
    }

    /// Opens the discovery sockets with full-size buffers.
    ///
    /// # Errors
    ///
    /// See [`multicast_up_with`](Self::multicast_up_with).
    pub fn multicast_up(&mut self) -> Result<MulticastFamilies, TransportError> {
        self.multicast_up_with(BufferConfig::default())
    }

    /// Opens the IPv4 and IPv6 discovery sockets independently.
    ///
    /// Any sockets already open are closed first.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Resources`] if `config` does not fit the fixed
    ///   buffers; no socket is created.
    /// - [`TransportError::MulticastUnavailable`] if neither family could be
    ///   opened; nothing is left open.
    pub fn multicast_up_with(
        &mut self,
        config: BufferConfig,
    ) -> Result<MulticastFamilies, TransportError> {
        self.multicast_down();

        if let Err(e) = self.buffers.configure(&config) {
            error!("multicast up: {e}");
            return Err(e.into());
        }

        self.ctx.udp4 = self.open_v4();
        self.ctx.udp6 = self.open_v6();

        let families = self.families();
        if !families.any() {
            error!("multicast up: no discovery socket could be opened");
            self.buffers.release();
            return Err(TransportError::MulticastUnavailable);
        }

        if !families.ipv4 {
            warn!("multicast up: IPv4 discovery unavailable, continuing with IPv6 only");
        }
        if !families.ipv6 {
            warn!("multicast up: IPv6 discovery unavailable, continuing with IPv4 only");
        }
        info!(
            "discovery transport up (ipv4={}, ipv6={})",
            families.ipv4, families.ipv6
        );
        Ok(families)
    }

    /// Closes whichever discovery sockets are open.  Safe to call when closed.
    pub fn multicast_down(&mut self) {
        if !self.ctx.is_empty() {
            debug!("closing discovery transport");
        }
        self.ctx.close_all(&*self.stack);
        self.buffers.release();
    }

    /// Families with an open socket.
    pub fn families(&self) -> MulticastFamilies {
        MulticastFamilies {
            ipv4: self.ctx.udp4.is_some(),
            ipv6: self.ctx.udp6.is_some(),
        }
    }

    /// Handle that closes the open discovery sockets from another thread,
    /// ending a blocked [`recv`](Self::recv) with a read error.
    pub fn closer(&self) -> SocketCloser {
        SocketCloser::new(Arc::clone(&self.stack), &self.ctx)
    }

    /// Socket, bind to an ephemeral port, join the IPv4 group.
    fn open_v4(&self) -> Option<SocketHandle> {
        let sock = match self.stack.socket(AddressFamily::V4, SocketKind::Datagram) {
            Ok(sock) => sock,
            Err(e) => {
                error!("multicast up v4: socket() failed: {e}");
                return None;
            }
        };

        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, ephemeral_port(&*self.platform)));
        if let Err(e) = self.stack.bind(sock, local) {
            error!("multicast up v4: bind({local}) failed: {e}");
            self.stack.close(sock);
            return None;
        }

        let join = SocketOption::JoinMulticastV4 {
            group: IPV4_MULTICAST_GROUP,
            interface: Ipv4Addr::UNSPECIFIED,
        };
        if let Err(e) = self.stack.set_option(sock, join) {
            warn!("multicast up v4: joining {IPV4_MULTICAST_GROUP} failed: {e}");
        }

        debug!("IPv4 discovery socket {sock} bound to {local}");
        Some(sock)
    }

    /// Look up the link-local address, socket, bind, join the IPv6 group on
    /// that interface.
    fn open_v6(&self) -> Option<SocketHandle> {
        let interface = match self.stack.ipv6_link_local() {
            Ok(addr) => addr,
            Err(e) => {
                error!("multicast up v6: no IPv6 address info: {e}");
                return None;
            }
        };

        let sock = match self.stack.socket(AddressFamily::V6, SocketKind::Datagram) {
            Ok(sock) => sock,
            Err(e) => {
                error!("multicast up v6: socket() failed: {e}");
                return None;
            }
        };

        let local = SocketAddr::from((Ipv6Addr::UNSPECIFIED, ephemeral_port(&*self.platform)));
        if let Err(e) = self.stack.bind(sock, local) {
            error!("multicast up v6: bind({local}) failed: {e}");
            self.stack.close(sock);
            return None;
        }

        let join = SocketOption::JoinMulticastV6 {
            group: IPV6_MULTICAST_GROUP,
            interface,
        };
        if let Err(e) = self.stack.set_option(sock, join) {
            warn!("multicast up v6: joining {IPV6_MULTICAST_GROUP} failed: {e}");
        }

        debug!("IPv6 discovery socket {sock} bound to {local}");
        Some(sock)
    }

    /// Waits up to `timeout` for either socket and drains every ready one.
    ///
    /// Each ready socket contributes at most `max_len` bytes, and the total
    /// never exceeds the free space of the RX buffer.  Returns the total
    /// number of bytes appended.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotOpen`] if no discovery socket is open.
    /// - [`TransportError::Timeout`] if neither socket became readable.
    /// - [`TransportError::Read`] if the wait fails, or if the last family
    ///   drained (IPv4 when both were ready) failed to read.  Bytes from a
    ///   family that did succeed stay in the RX buffer either way.
    pub fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<usize, TransportError> {
        debug_assert_eq!(self.buffers.rx.direction(), Direction::Rx);

        let mut watch = [SocketHandle(0); 2];
        let mut watched = 0;
        let mut index_v4 = None;
        let mut index_v6 = None;
        if let Some(sock) = self.ctx.udp4 {
            index_v4 = Some(watched);
            watch[watched] = sock;
            watched += 1;
        }
        if let Some(sock) = self.ctx.udp6 {
            index_v6 = Some(watched);
            watch[watched] = sock;
            watched += 1;
        }
        if watched == 0 {
            error!("discovery recv: no open sockets");
            return Err(TransportError::NotOpen);
        }

        let ready = self
            .stack
            .select(&watch[..watched], timeout)
            .map_err(|e| {
                error!("discovery recv: select() failed: {e}");
                TransportError::Read(e)
            })?;
        if ready.is_empty() {
            trace!("discovery recv: timed out after {timeout:?}");
            return Err(TransportError::Timeout);
        }

        stir_entropy(&*self.platform);

        // IPv6 is drained before IPv4.  The order is an arbitrary tie-break
        // kept for compatibility with existing peers' traces.
        let legs = [(index_v6, self.ctx.udp6), (index_v4, self.ctx.udp4)];

        let mut received = 0;
        // Each drained family overwrites the status, so the last one decides.
        let mut status: Result<(), StackError> = Ok(());
        for (index, sock) in legs {
            let (Some(index), Some(sock)) = (index, sock) else {
                continue;
            };
            if !ready.contains(index) {
                continue;
            }

            let rx = &mut self.buffers.rx;
            let want = rx.space().min(max_len);
            if want == 0 {
                continue;
            }

            match self.stack.recv_from(sock, &mut rx.writable()[..want]) {
                Ok((0, from)) => {
                    error!("discovery recv: empty datagram from {from} on {sock}");
                    status = Err(StackError::Closed);
                }
                Ok((n, from)) => {
                    trace!("discovery recv: {n} bytes from {from} on {sock}");
                    received += rx.commit(n);
                    status = Ok(());
                }
                Err(e) => {
                    error!("discovery recv: recv_from() on {sock} failed: {e}");
                    status = Err(e);
                }
            }
        }

        match status {
            Ok(()) => Ok(received),
            Err(e) => {
                if received > 0 {
                    debug!("discovery recv: {received} bytes kept despite read failure");
                }
                Err(TransportError::Read(e))
            }
        }
    }

    /// Fans the available TX bytes out to every discovery destination.
    ///
    /// The TX buffer is reset on return whether or not any leg succeeded.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotOpen`] if there is data to send but no socket.
    /// - [`TransportError::FanOutFailed`] if no leg delivered the full payload.
    pub fn send(&mut self) -> Result<(), TransportError> {
        debug_assert_eq!(self.buffers.tx.direction(), Direction::Tx);
        let result = self.fan_out();
        self.buffers.tx.reset();
        result
    }

    fn fan_out(&self) -> Result<(), TransportError> {
        let payload = self.buffers.tx.readable();
        if payload.is_empty() {
            return Ok(());
        }

        let legs = [
            (
                self.ctx.udp4,
                SocketAddr::V4(SocketAddrV4::new(IPV4_MULTICAST_GROUP, DISCOVERY_PORT)),
            ),
            (
                self.ctx.udp4,
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            ),
            (
                self.ctx.udp6,
                SocketAddr::V6(SocketAddrV6::new(IPV6_MULTICAST_GROUP, DISCOVERY_PORT, 0, 0)),
            ),
        ];

        let mut attempted = 0;
        let mut delivered = 0;
        for (sock, dest) in legs {
            let Some(sock) = sock else {
                continue;
            };
            attempted += 1;
            match self.stack.send_to(sock, payload, dest) {
                Ok(n) if n == payload.len() => {
                    trace!("discovery send: {n} bytes to {dest}");
                    delivered += 1;
                }
                Ok(n) => warn!(
                    "discovery send: short write to {dest} ({n} of {} bytes)",
                    payload.len()
                ),
                Err(e) => warn!("discovery send: send_to({dest}) failed: {e}"),
            }
        }

        if attempted == 0 {
            error!("discovery send: no open sockets");
            return Err(TransportError::NotOpen);
        }
        if delivered == 0 {
            error!("discovery send: all {attempted} destinations failed");
            return Err(TransportError::FanOutFailed { attempted });
        }
        debug!("discovery send: {delivered}/{attempted} destinations reached");
        Ok(())
    }
}

impl NetIo for DiscoveryTransport {
    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<usize, TransportError> {
        DiscoveryTransport::recv(self, max_len, timeout)
    }

    fn send(&mut self) -> Result<(), TransportError> {
        DiscoveryTransport::send(self)
    }

    fn rx(&mut self) -> &mut IoBuffer {
        &mut self.buffers.rx
    }

    fn tx(&mut self) -> &mut IoBuffer {
        &mut self.buffers.tx
    }
}

impl Drop for DiscoveryTransport {
    fn drop(&mut self) {
        self.ctx.close_all(&*self.stack);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
