//! Wireless association: connection state, the controller and scan ranking.
//!
//! # Sub-modules
//!
//! - **`state`** – [`ConnectState`], the pure [`transition`] function and
//!   the atomic [`ConnectionCell`] shared with driver callbacks.
//! - **`controller`** – [`WifiController`]: station connect, soft-AP
//!   bring-up, disconnect and DHCP address acquisition.
//! - **`scan`** – turns raw driver scan entries into ranked [`ScanRecord`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::DriverError;

pub mod controller;
pub mod scan;
pub mod state;

pub use crate::driver::IpConfig;
pub use controller::{WifiController, WifiTimings};
pub use scan::{classify, rank_scan_results, ScanRecord};
pub use state::{
    transition, ConnectState, ConnectionCell, LinkEvent, SoftApSignal, StationSignal,
};

/// Security of a wireless network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SecurityType {
    #[default]
    None = 0,
    Wep = 1,
    Wpa = 2,
    Wpa2 = 3,
}

impl SecurityType {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Wep,
            2 => Self::Wpa,
            3 => Self::Wpa2,
            _ => Self::None,
        }
    }

    /// `true` if association is followed by a separate authentication step
    /// whose result the driver reports on its own.
    pub fn has_handshake(self) -> bool {
        matches!(self, Self::Wpa | Self::Wpa2)
    }
}

/// Pairwise cipher of a wireless network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherType {
    #[default]
    None,
    Wep,
    Tkip,
    Ccmp,
}

/// Error type for wireless operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WifiError {
    /// The radio did not reach the associated link state in time.
    #[error("could not associate with {ssid:?}")]
    Connect { ssid: String },
    /// An address or client did not appear before the budget ran out.
    #[error("timed out after {waited:?}")]
    Timeout { waited: Duration },
    /// The operation needs an association that cannot exist in `state`.
    #[error("not associated (state: {state})")]
    NotAssociated { state: ConnectState },
    /// A scan finished without finding any network.
    #[error("no networks found")]
    NoNetworks,
    #[error(transparent)]
    Driver(#[from] DriverError),
}
