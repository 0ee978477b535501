//! Infrastructure layer for the node.
//!
//! Contains the host adapters behind the `airlink-core` collaborator traits.
//!
//! **Dependency rule**: this layer may depend on `airlink_core`, but MUST NOT
//! be imported by `airlink_core`.
//!
//! # Sub-modules
//!
//! - **`socket_stack`** – [`HostSocketStack`]: `SocketStack` over `std::net`
//!   sockets, with readiness waits done by a `mio::Poll`.
//!
//! - **`platform`** – [`HostPlatform`]: thread sleep, `rand` randomness and a
//!   monotonic clock.
//!
//! - **`radio`** – [`SimulatedRadio`]: a `WlanDriver` that behaves like a
//!   radio (asynchronous link callbacks, delayed DHCP lease, scan list) with
//!   its behaviour taken from the `[radio]` configuration section.
//!
//! - **`storage`** – TOML configuration persistence.

pub mod platform;
pub mod radio;
pub mod socket_stack;
pub mod storage;

pub use platform::HostPlatform;
pub use radio::SimulatedRadio;
pub use socket_stack::HostSocketStack;
