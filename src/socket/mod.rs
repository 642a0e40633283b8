//! The RDP connection socket: the state machine at the heart of this crate.

pub mod rdp;

pub use rdp::{AcceptQueue, BoundedAcceptQueue, Connection, ConnHandle, RecvItem, State};
