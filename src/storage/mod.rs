//! Bounded, connection-owned queues: the retransmission queue (§4.2) and
//! the reassembly queue (§4.3). Both are fixed-capacity (`heapless::Vec`)
//! at `MAX_WINDOW`/`2 * MAX_WINDOW` entries (§6), matching the
//! resource-constrained target this crate is built for — no heap growth
//! once a connection is allocated.

mod reassembly;
mod retransmit;

pub use reassembly::ReassemblyQueue;
pub use retransmit::{RetransmitEntry, RetransmitQueue};

/// Maximum number of unacknowledged segments in flight for any connection
/// (`CSP_RDP_MAX_WINDOW`, §6). Negotiated `window_size` must not exceed
/// this; it bounds the fixed-capacity queues below.
pub const MAX_WINDOW: usize = 20;

/// Error returned when enqueuing into a full bounded queue.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Full;

impl std::fmt::Display for Full {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "queue full")
    }
}

impl std::error::Error for Full {}
