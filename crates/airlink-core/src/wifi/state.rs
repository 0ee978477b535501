//! Connection state machine and the atomic cell that holds it.
//!
//! # How the state changes (for beginners)
//!
//! Two parties write the connection state:
//!
//! 1. The **controller** (the thread that calls `connect`, `disconnect`,
//!    `enable_soft_ap`) sets it directly at well-defined points.
//! 2. The **radio driver** reports link changes through a callback that runs
//!    in a context the application does not control.  Each report is turned
//!    into a [`LinkEvent`] and fed through [`transition`].
//!
//! [`transition`] is a pure function of `(current state, event)`, so the
//! whole table can be tested with literal event sequences.  The
//! [`ConnectionCell`] applies it with a compare-and-swap loop, which keeps a
//! callback and the polling thread from losing each other's updates.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use super::SecurityType;

/// Association state of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectState {
    /// No association.
    Idle = 0,
    /// Link is up on a secured network; waiting for the handshake result.
    Connecting = 1,
    /// Station associated.
    ConnectOk = 2,
    /// The last attempt failed.
    ConnectFailed = 3,
    /// The secured-network handshake was rejected.
    AuthFailed = 4,
    /// A disconnect was requested and has not been confirmed yet.
    Disconnecting = 5,
    /// Access point is starting.
    SoftApInit = 6,
    /// Access point is up with no client attached.
    SoftApUp = 7,
    /// Access point is up and a client is attached.
    StationOk = 8,
}

impl ConnectState {
    fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::ConnectOk,
            3 => Self::ConnectFailed,
            4 => Self::AuthFailed,
            5 => Self::Disconnecting,
            6 => Self::SoftApInit,
            7 => Self::SoftApUp,
            8 => Self::StationOk,
            _ => return None,
        })
    }

    /// `true` for the three access-point lifecycle states.
    pub fn is_soft_ap(self) -> bool {
        matches!(self, Self::SoftApInit | Self::SoftApUp | Self::StationOk)
    }
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ConnectOk => "connected",
            Self::ConnectFailed => "connect failed",
            Self::AuthFailed => "auth failed",
            Self::Disconnecting => "disconnecting",
            Self::SoftApInit => "soft-AP starting",
            Self::SoftApUp => "soft-AP up",
            Self::StationOk => "soft-AP client attached",
        };
        f.write_str(name)
    }
}

/// Station-mode link notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationSignal {
    Down,
    Up,
    AuthFailed,
    AuthOk,
}

impl StationSignal {
    /// Decodes a raw driver code.  Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Down),
            1 => Some(Self::Up),
            10 => Some(Self::AuthFailed),
            16 => Some(Self::AuthOk),
            _ => None,
        }
    }
}

/// Soft-AP-mode link notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftApSignal {
    Down,
    Up,
}

impl SoftApSignal {
    /// Decodes a raw driver code.  Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Down),
            1 => Some(Self::Up),
            _ => None,
        }
    }
}

/// One notification from the radio, with the context needed to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// `security` is the security of the network being joined; an `Up` on a
    /// network without a handshake is final.
    Station {
        signal: StationSignal,
        security: SecurityType,
    },
    SoftAp(SoftApSignal),
}

/// Next state after `event` arrives in state `current`.
pub fn transition(current: ConnectState, event: LinkEvent) -> ConnectState {
    use ConnectState::*;

    match event {
        LinkEvent::Station { signal, security } => match signal {
            StationSignal::Down => match current {
                Disconnecting | ConnectOk => Idle,
                // Every other state, ConnectFailed included, lands here.
                _ => ConnectFailed,
            },
            StationSignal::Up if security.has_handshake() => Connecting,
            StationSignal::Up => ConnectOk,
            StationSignal::AuthFailed => AuthFailed,
            StationSignal::AuthOk => ConnectOk,
        },
        LinkEvent::SoftAp(signal) => match signal {
            SoftApSignal::Down => match current {
                Disconnecting | SoftApUp => Idle,
                StationOk => SoftApUp,
                _ => ConnectFailed,
            },
            SoftApSignal::Up => match current {
                SoftApInit => SoftApUp,
                _ => StationOk,
            },
        },
    }
}

/// Shared, lock-free holder of the connection state and the security of the
/// network being joined.
#[derive(Debug)]
pub struct ConnectionCell {
    state: AtomicU8,
    security: AtomicU8,
}

impl ConnectionCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectState::Idle as u8),
            security: AtomicU8::new(SecurityType::None as u8),
        }
    }

    pub fn get(&self) -> ConnectState {
        ConnectState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ConnectState::Idle)
    }

    pub fn set(&self, state: ConnectState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Applies `event` atomically.  Returns `(previous, next)`.
    pub fn apply(&self, event: LinkEvent) -> (ConnectState, ConnectState) {
        let decode = |raw| ConnectState::from_u8(raw).unwrap_or(ConnectState::Idle);
        let previous = match self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(transition(decode(raw), event) as u8)
            }) {
            Ok(raw) | Err(raw) => decode(raw),
        };
        (previous, transition(previous, event))
    }

    pub fn security(&self) -> SecurityType {
        SecurityType::from_u8(self.security.load(Ordering::Acquire))
    }

    pub fn set_security(&self, security: SecurityType) {
        self.security.store(security as u8, Ordering::Release);
    }
}

impl Default for ConnectionCell {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
