//! A connection-oriented, reliable, sequenced transport over an unreliable
//! datagram layer: RFC-908 Reliable Data Protocol, extended with delayed
//! and selective (extended) acknowledgements, sized for resource-constrained
//! hosts such as small-spacecraft flight computers.
//!
//! The crate is organized the way the protocol itself is: [`wire`] is the
//! on-the-wire header codec, [`storage`] holds the per-connection
//! retransmission and reassembly queues, [`socket`] is the state machine
//! that ties them together, and [`api`] is the thin, lock-acquiring public
//! surface callers actually use. [`env`] names the capabilities (sending a
//! datagram, allocating a buffer, reading the clock) the core is
//! polymorphic over, so it never has to know what's underneath it.

pub mod api;
pub mod env;
pub mod error;
pub mod options;
pub mod socket;
pub mod storage;
pub mod sync;
pub mod time;
pub mod wire;

pub use api::{ConnectionTable, Runtime};
pub use error::{Error, Result};
pub use options::Options;
pub use socket::{AcceptQueue, BoundedAcceptQueue, ConnHandle, RecvItem, State};
