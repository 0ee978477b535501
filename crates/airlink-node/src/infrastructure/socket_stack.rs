//! `HostSocketStack`: the `SocketStack` trait over host sockets.
//!
//! # Mapping the BSD call sequence onto `std::net` (for beginners)
//!
//! The core speaks the classic BSD sequence: `socket()` first, then `bind()`
//! or `connect()`.  `std::net` has no "unbound socket" type; a `UdpSocket`
//! only exists once bound and a `TcpStream` only once connected.  The stack
//! therefore hands out a handle in a *pending* state from
//! [`socket`](SocketStack::socket) and creates the real socket on the first
//! `bind` or `connect`.
//!
//! Readiness waits use a fresh `mio::Poll` per call.  Each watched socket is
//! registered through its raw file descriptor (`SourceFd`), so the sockets
//! themselves stay in blocking mode and every other call behaves exactly as
//! the trait documents.
//!
//! # Closing under a wait
//!
//! Every wait also owns a `mio::Waker` recorded against the handles it
//! watches.  [`close`](SocketStack::close) removes the handle, then fires the
//! wakers of the waits watching it; the woken wait notices the missing handle
//! and fails with [`StackError::Closed`].  The wait holds its own reference to
//! each watched socket, so the descriptor stays valid until the wait returns.
//!
//! # Differences from an embedded stack
//!
//! - `SO_LINGER` cannot be set through `std`; it reports
//!   [`StackError::Unsupported`], which the transports treat as a warning.
//! - [`ipv6_link_local`](SocketStack::ipv6_link_local) returns the
//!   unspecified address, which makes IPv6 group joins use the default
//!   interface.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use airlink_core::driver::SocketOption;
use airlink_core::{AddressFamily, ReadySet, SocketHandle, SocketKind, SocketStack, StackError};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, trace, warn};

/// Poll token of the waker; watched sockets use their index in `watch`.
const WAKE_TOKEN: Token = Token(ReadySet::MAX_WATCH);

/// State of one handle.
#[derive(Debug, Clone)]
enum Slot {
    /// Created by `socket()`, not yet bound or connected.
    Pending {
        family: AddressFamily,
        kind: SocketKind,
    },
    Stream(Arc<TcpStream>),
    Datagram(Arc<UdpSocket>),
}

impl Slot {
    fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Self::Pending { .. } => None,
            Self::Stream(s) => Some(s.as_raw_fd()),
            Self::Datagram(s) => Some(s.as_raw_fd()),
        }
    }
}

/// A `select` in progress.
#[derive(Debug)]
struct Wait {
    watch: Vec<u32>,
    waker: Arc<Waker>,
}

/// Removes a wait from the registry when the `select` returns.
struct WaitGuard<'a> {
    stack: &'a HostSocketStack,
    id: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut waits) = self.stack.waits.lock() {
            waits.remove(&self.id);
        }
    }
}

/// `SocketStack` backed by the host's network stack.
///
/// Handles are never reused within one stack instance.
#[derive(Debug, Default)]
pub struct HostSocketStack {
    sockets: Mutex<HashMap<u32, Slot>>,
    next_id: AtomicU32,
    waits: Mutex<HashMap<u64, Wait>>,
    next_wait: AtomicU64,
}

impl HostSocketStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently open (pending or live).
    pub fn open_count(&self) -> usize {
        self.sockets.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Clones the slot out so no lock is held across blocking I/O.
    fn slot(&self, sock: SocketHandle) -> Result<Slot, StackError> {
        let sockets = self.sockets.lock().map_err(|_| StackError::Code(-1))?;
        sockets.get(&sock.0).cloned().ok_or(StackError::Closed)
    }

    fn replace(&self, sock: SocketHandle, slot: Slot) -> Result<(), StackError> {
        let mut sockets = self.sockets.lock().map_err(|_| StackError::Code(-1))?;
        match sockets.get_mut(&sock.0) {
            Some(existing) => {
                *existing = slot;
                Ok(())
            }
            // Closed while the blocking call ran.
            None => Err(StackError::Closed),
        }
    }

    fn stream(&self, sock: SocketHandle) -> Result<Arc<TcpStream>, StackError> {
        match self.slot(sock)? {
            Slot::Stream(stream) => Ok(stream),
            Slot::Pending { .. } => Err(StackError::Closed),
            Slot::Datagram(_) => Err(StackError::Unsupported),
        }
    }

    fn datagram(&self, sock: SocketHandle) -> Result<Arc<UdpSocket>, StackError> {
        match self.slot(sock)? {
            Slot::Datagram(socket) => Ok(socket),
            Slot::Pending { .. } => Err(StackError::Closed),
            Slot::Stream(_) => Err(StackError::Unsupported),
        }
    }

    fn register_wait(
        &self,
        watch: &[SocketHandle],
        waker: Arc<Waker>,
    ) -> Result<WaitGuard<'_>, StackError> {
        let id = self.next_wait.fetch_add(1, Ordering::Relaxed);
        let mut waits = self.waits.lock().map_err(|_| StackError::Code(-1))?;
        waits.insert(
            id,
            Wait {
                watch: watch.iter().map(|sock| sock.0).collect(),
                waker,
            },
        );
        Ok(WaitGuard { stack: self, id })
    }

    /// Wakes every wait watching `sock`.
    fn wake_waits(&self, sock: SocketHandle) {
        let Ok(waits) = self.waits.lock() else {
            return;
        };
        for wait in waits.values().filter(|w| w.watch.contains(&sock.0)) {
            if let Err(e) = wait.waker.wake() {
                warn!("{sock}: waking a pending select failed: {e}");
            }
        }
    }

    fn all_open(&self, watch: &[SocketHandle]) -> bool {
        self.sockets
            .lock()
            .map(|sockets| watch.iter().all(|sock| sockets.contains_key(&sock.0)))
            .unwrap_or(false)
    }

    /// Family and kind of a pending handle; anything else is already in use.
    fn pending(&self, sock: SocketHandle) -> Result<(AddressFamily, SocketKind), StackError> {
        match self.slot(sock)? {
            Slot::Pending { family, kind } => Ok((family, kind)),
            _ => Err(StackError::Code(-1)),
        }
    }
}

/// Runs `wait` with the time left of `timeout`, again after every
/// interruption by a signal.
fn retry_interrupted<F>(timeout: Duration, mut wait: F) -> io::Result<()>
where
    F: FnMut(Duration) -> io::Result<()>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut remaining = timeout;
    loop {
        match wait(remaining) {
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                if let Some(deadline) = deadline {
                    remaining = deadline.saturating_duration_since(Instant::now());
                }
                trace!("select interrupted, {remaining:?} left");
            }
            other => return other,
        }
    }
}

/// Maps a host I/O error to the stack's error vocabulary.
fn stack_error(e: io::Error) -> StackError {
    match e.kind() {
        ErrorKind::WouldBlock => StackError::NoBufferSpace,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => StackError::Closed,
        ErrorKind::Unsupported => StackError::Unsupported,
        _ => StackError::Code(e.raw_os_error().map_or(-1, |code| -code)),
    }
}

impl SocketStack for HostSocketStack {
    fn socket(&self, family: AddressFamily, kind: SocketKind) -> Result<SocketHandle, StackError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut sockets = self.sockets.lock().map_err(|_| StackError::Code(-1))?;
        sockets.insert(id, Slot::Pending { family, kind });
        trace!("socket {family:?}/{kind:?} -> sock#{id}");
        Ok(SocketHandle(id))
    }

    fn bind(&self, sock: SocketHandle, local: SocketAddr) -> Result<(), StackError> {
        let (family, kind) = self.pending(sock)?;
        if kind != SocketKind::Datagram || family != AddressFamily::of(&local) {
            return Err(StackError::Unsupported);
        }

        let socket = UdpSocket::bind(local).map_err(stack_error)?;
        if family == AddressFamily::V4 {
            socket.set_broadcast(true).map_err(stack_error)?;
        }
        debug!("{sock} bound to {local}");
        self.replace(sock, Slot::Datagram(Arc::new(socket)))
    }

    fn connect(&self, sock: SocketHandle, remote: SocketAddr) -> Result<(), StackError> {
        let (family, kind) = self.pending(sock)?;
        if kind != SocketKind::Stream || family != AddressFamily::of(&remote) {
            return Err(StackError::Unsupported);
        }

        let stream = TcpStream::connect(remote).map_err(stack_error)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("{sock}: TCP_NODELAY rejected: {e}");
        }
        debug!("{sock} connected to {remote}");
        self.replace(sock, Slot::Stream(Arc::new(stream)))
    }

    fn set_option(&self, sock: SocketHandle, option: SocketOption) -> Result<(), StackError> {
        match option {
            SocketOption::Linger { .. } => Err(StackError::Unsupported),
            SocketOption::JoinMulticastV4 { group, interface } => self
                .datagram(sock)?
                .join_multicast_v4(&group, &interface)
                .map_err(stack_error),
            SocketOption::JoinMulticastV6 { group, .. } => self
                .datagram(sock)?
                .join_multicast_v6(&group, 0)
                .map_err(stack_error),
        }
    }

    fn send(&self, sock: SocketHandle, data: &[u8]) -> Result<usize, StackError> {
        let stream = self.stream(sock)?;
        (&*stream).write(data).map_err(stack_error)
    }

    fn recv(&self, sock: SocketHandle, buf: &mut [u8]) -> Result<usize, StackError> {
        let stream = self.stream(sock)?;
        (&*stream).read(buf).map_err(stack_error)
    }

    fn send_to(&self, sock: SocketHandle, data: &[u8], dest: SocketAddr) -> Result<usize, StackError> {
        self.datagram(sock)?.send_to(data, dest).map_err(stack_error)
    }

    fn recv_from(
        &self,
        sock: SocketHandle,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), StackError> {
        self.datagram(sock)?.recv_from(buf).map_err(stack_error)
    }

    fn select(&self, watch: &[SocketHandle], timeout: Duration) -> Result<ReadySet, StackError> {
        if watch.len() > ReadySet::MAX_WATCH {
            return Err(StackError::Unsupported);
        }

        let mut poll = Poll::new().map_err(stack_error)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(stack_error)?;
        // Registered before the lookup so a close racing with it still wakes us.
        let _wait = self.register_wait(watch, Arc::new(waker))?;

        // Held until return: a concurrent close must not release the fds.
        let slots = watch
            .iter()
            .map(|&sock| self.slot(sock))
            .collect::<Result<Vec<_>, _>>()?;
        for (index, slot) in slots.iter().enumerate() {
            let fd = slot.raw_fd().ok_or(StackError::Closed)?;
            poll.registry()
                .register(&mut SourceFd(&fd), Token(index), Interest::READABLE)
                .map_err(stack_error)?;
        }

        let mut events = Events::with_capacity(watch.len() + 1);
        retry_interrupted(timeout, |remaining| {
            poll.poll(&mut events, Some(remaining))
        })
        .map_err(stack_error)?;

        if !self.all_open(watch) {
            debug!("select: a watched socket was closed during the wait");
            return Err(StackError::Closed);
        }

        let mut ready = ReadySet::empty();
        for event in events.iter().filter(|e| e.token() != WAKE_TOKEN) {
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                ready.insert(event.token().0);
            }
        }
        Ok(ready)
    }

    fn close(&self, sock: SocketHandle) {
        let removed = self
            .sockets
            .lock()
            .ok()
            .and_then(|mut sockets| sockets.remove(&sock.0));
        match removed {
            Some(Slot::Stream(stream)) => {
                // Wakes a reader blocked on another thread.
                stream.shutdown(std::net::Shutdown::Both).ok();
            }
            Some(_) => {}
            None => return,
        }
        self.wake_waits(sock);
        trace!("{sock} closed");
    }

    fn ipv6_link_local(&self) -> Result<Ipv6Addr, StackError> {
        Ok(Ipv6Addr::UNSPECIFIED)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
