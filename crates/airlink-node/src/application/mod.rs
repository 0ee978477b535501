//! Application layer use cases for the node.
//!
//! # What use cases does the node have?
//!
//! - **`bring_up`** – [`LinkBringUp`](bring_up::LinkBringUp): associates
//!   (station or soft AP, as configured), acquires an address and opens the
//!   discovery sockets.  Reports which multicast families came up.
//!
//! - **`beacon`** – [`DiscoveryBeacon`](beacon::DiscoveryBeacon): announces
//!   the node on the discovery groups at a fixed interval and logs every
//!   answer, until a shared stop flag clears.
//!
//! - **`probe`** – one request/response exchange with a single peer over
//!   the unicast transport.
//!
//! All three talk to the transports only through `airlink-core` types, so
//! they run unchanged against the host socket stack or a test double.

pub mod beacon;
pub mod bring_up;
pub mod probe;
