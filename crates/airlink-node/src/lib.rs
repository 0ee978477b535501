//! airlink-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the node do? (for beginners)
//!
//! `airlink-core` contains the transports and the association state machine
//! but no OS calls.  The node supplies the missing pieces for a desktop or
//! server host and runs the usual device lifecycle:
//!
//! 1. Associate with a network (station) or start an access point (soft AP).
//! 2. Acquire an IPv4 address.
//! 3. Bring up the discovery sockets and announce itself with periodic
//!    beacons, logging whoever answers.
//!
//! The radio on a host is simulated (see
//! [`infrastructure::radio::SimulatedRadio`]); the sockets are real.

#[cfg(not(unix))]
compile_error!("airlink-node's host socket stack requires a Unix platform");

/// Application layer: link bring-up, discovery beacon and unicast probe.
pub mod application;

/// Infrastructure layer: host socket stack, platform services, simulated
/// radio and configuration storage.
pub mod infrastructure;
