//! Probe: one request/response exchange with a single peer.

use std::net::SocketAddr;
use std::time::Duration;

use airlink_core::{NetIo, TransportError, UnicastTransport};
use tracing::{info, warn};

/// Connects to `peer`, sends `payload`, waits up to `timeout` for one
/// answer and disconnects.  Returns the bytes of the answer.
///
/// The connection is closed whether or not the exchange succeeded.
///
/// # Errors
///
/// - [`TransportError::Connect`] if the peer cannot be reached.
/// - [`TransportError::Timeout`] if no answer arrived in time.
/// - [`TransportError::Write`] / [`TransportError::Read`] on socket errors.
pub fn probe(
    transport: &mut UnicastTransport,
    peer: SocketAddr,
    payload: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    transport.connect(peer)?;
    let result = exchange(transport, payload, timeout);
    transport.disconnect();

    if let Ok(answer) = &result {
        info!("probe {peer}: {} byte answer", answer.len());
    }
    result
}

/// Sends `payload` and returns the first chunk that comes back.
pub fn exchange(
    io: &mut dyn NetIo,
    payload: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let tx = io.tx();
    tx.reset();
    let queued = tx.fill_from(payload);
    if queued < payload.len() {
        warn!("probe: payload truncated to {queued} of {} bytes", payload.len());
    }
    io.send()?;

    let rx = io.rx();
    rx.reset();
    let room = rx.space();
    io.recv(room, timeout)?;
    Ok(io.rx().readable().to_vec())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
