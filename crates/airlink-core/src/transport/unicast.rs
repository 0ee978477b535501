//! Unicast transport: one stream socket wrapped in an RX/TX buffer pair.
//!
//! # Send semantics
//!
//! [`UnicastTransport::send`] keeps writing until every available byte of the
//! TX buffer has been accepted.  The network stack may accept fewer bytes than
//! offered (a partial write), and may report [`StackError::NoBufferSpace`]
//! when its packet pool is momentarily exhausted.  The latter is not a
//! failure: the transport sleeps for [`SEND_RETRY_BACKOFF`] and tries again.
//! Any other error ends the call with [`TransportError::Write`] and leaves the
//! buffer as it was at that point.
//!
//! # Receive semantics
//!
//! [`UnicastTransport::recv`] waits for readiness with a bounded timeout and
//! performs one read.  A short read is normal; the caller re-invokes `recv`
//! until it has a complete message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::{
    stir_entropy, BufferConfig, BufferPair, NetContext, NetIo, SocketCloser, TransportError,
    SEND_RETRY_BACKOFF,
};
use crate::buffer::{Direction, IoBuffer};
use crate::driver::{AddressFamily, Platform, SocketKind, SocketOption, SocketStack, StackError};

/// Force-close on shutdown: linger enabled with a zero timeout.
const LINGER_NONE: SocketOption = SocketOption::Linger {
    enabled: true,
    seconds: 0,
};

/// A stream connection to a single peer.
pub struct UnicastTransport {
    stack: Arc<dyn SocketStack>,
    platform: Arc<dyn Platform>,
    ctx: NetContext,
    buffers: BufferPair,
    peer: Option<SocketAddr>,
}

impl UnicastTransport {
    /// Creates a closed transport and allocates its buffers.
    pub fn new(stack: Arc<dyn SocketStack>, platform: Arc<dyn Platform>) -> Self {
        Self {
            stack,
            platform,
            ctx: NetContext::default(),
            buffers: BufferPair::new(),
            peer: None,
        }
    }

    /// Connects to `remote` with full-size buffers.
    ///
    /// # Errors
    ///
    /// See [`connect_with`](Self::connect_with).
    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), TransportError> {
        self.connect_with(remote, BufferConfig::default())
    }

    /// Connects to `remote`, sizing the buffers according to `config`.
    ///
    /// Any existing connection is closed first.  The address family of the
    /// socket follows the family of `remote`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Resources`] if `config` does not fit the fixed
    ///   buffers.  No socket is created in that case.
    /// - [`TransportError::Connect`] if the socket cannot be created or the
    ///   connect fails.  The socket is closed before returning.
    pub fn connect_with(
        &mut self,
        remote: SocketAddr,
        config: BufferConfig,
    ) -> Result<(), TransportError> {
        self.disconnect();

        if let Err(e) = self.buffers.configure(&config) {
            error!("unicast connect: {e}");
            return Err(e.into());
        }

        let sock = match self.stack.socket(AddressFamily::of(&remote), SocketKind::Stream) {
            Ok(sock) => sock,
            Err(source) => {
                error!("unicast connect: socket() failed: {source}");
                self.buffers.release();
                return Err(TransportError::Connect {
                    addr: remote,
                    source,
                });
            }
        };

        if let Err(source) = self.stack.connect(sock, remote) {
            error!("connect to {remote} failed: {source}");
            self.stack.close(sock);
            self.buffers.release();
            return Err(TransportError::Connect {
                addr: remote,
                source,
            });
        }

        self.ctx.tcp = Some(sock);
        self.peer = Some(remote);

        if let Err(e) = self.stack.set_option(sock, LINGER_NONE) {
            warn!("unicast connect: linger option on {sock} rejected: {e}");
        }

        info!("connected to {remote} on {sock}");
        Ok(())
    }

    /// Closes the socket and detaches the buffers.  Safe to call when closed.
    pub fn disconnect(&mut self) {
        if !self.ctx.is_empty() {
            debug!("closing unicast transport to {:?}", self.peer);
        }
        self.ctx.close_all(&*self.stack);
        self.buffers.release();
        self.peer = None;
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.tcp.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Handle that closes the current connection from another thread,
    /// ending a blocked [`recv`](Self::recv) with a read error.
    pub fn closer(&self) -> SocketCloser {
        SocketCloser::new(Arc::clone(&self.stack), &self.ctx)
    }

    /// Drains the TX buffer to the socket.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotOpen`] if not connected.
    /// - [`TransportError::Write`] on any stack error other than
    ///   [`StackError::NoBufferSpace`], or when the stack accepts zero bytes.
    pub fn send(&mut self) -> Result<(), TransportError> {
        let sock = self.ctx.tcp.ok_or(TransportError::NotOpen)?;
        let tx = &mut self.buffers.tx;
        debug_assert_eq!(tx.direction(), Direction::Tx);

        while tx.available() > 0 {
            match self.stack.send(sock, tx.readable()) {
                Ok(0) => {
                    error!("unicast send: stack accepted 0 of {} bytes", tx.available());
                    return Err(TransportError::Write(StackError::Closed));
                }
                Ok(n) => {
                    trace!("unicast send: wrote {n} of {} bytes", tx.available());
                    tx.consume(n);
                }
                Err(StackError::NoBufferSpace) => {
                    debug!("unicast send: stack out of buffers, retrying");
                    self.platform.sleep(SEND_RETRY_BACKOFF);
                }
                Err(e) => {
                    error!("unicast send: send() failed: {e}");
                    return Err(TransportError::Write(e));
                }
            }
        }

        tx.reset();
        Ok(())
    }

    /// Waits up to `timeout` for the socket to become readable, then reads at
    /// most `max_len` bytes (bounded by the free space) into the RX buffer.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if nothing arrived in time; the buffer is
    ///   unchanged.
    /// - [`TransportError::Read`] if the wait or the read fails, the peer
    ///   closed the connection, or the socket was closed through a
    ///   [`SocketCloser`] while waiting.
    pub fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<usize, TransportError> {
        let sock = self.ctx.tcp.ok_or(TransportError::NotOpen)?;
        debug_assert_eq!(self.buffers.rx.direction(), Direction::Rx);

        let ready = self.stack.select(&[sock], timeout).map_err(|e| {
            error!("unicast recv: select() failed: {e}");
            TransportError::Read(e)
        })?;
        if ready.is_empty() {
            return Err(TransportError::Timeout);
        }

        stir_entropy(&*self.platform);

        let rx = &mut self.buffers.rx;
        let want = rx.space().min(max_len);
        if want == 0 {
            return Ok(0);
        }

        match self.stack.recv(sock, &mut rx.writable()[..want]) {
            Ok(0) => {
                error!("unicast recv: connection closed by peer");
                Err(TransportError::Read(StackError::Closed))
            }
            Ok(n) => {
                trace!("unicast recv: read {n} bytes");
                Ok(rx.commit(n))
            }
            Err(e) => {
                error!("unicast recv: recv() failed: {e}");
                Err(TransportError::Read(e))
            }
        }
    }
}

impl NetIo for UnicastTransport {
    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<usize, TransportError> {
        UnicastTransport::recv(self, max_len, timeout)
    }

    fn send(&mut self) -> Result<(), TransportError> {
        UnicastTransport::send(self)
    }

    fn rx(&mut self) -> &mut IoBuffer {
        &mut self.buffers.rx
    }

    fn tx(&mut self) -> &mut IoBuffer {
        &mut self.buffers.tx
    }
}

impl Drop for UnicastTransport {
    fn drop(&mut self) {
        self.ctx.close_all(&*self.stack);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
