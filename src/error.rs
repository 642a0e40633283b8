//! Typed errors for the RDP core (§7).
//!
//! The protocol's own internal responses to bad input — EACK, SYN/ACK
//! retransmit, reset-and-close — are not errors: they're the state machine
//! doing its job. Only genuinely caller-visible failures get an `Error`
//! variant.

/// A caller-visible failure from a public API call.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The global RDP lock could not be acquired within its 1 s budget.
    #[error("RDP lock deadlock: wait exceeded budget")]
    LockDeadlock,

    /// The packet buffer pool has no space left.
    #[error("packet allocation failed")]
    AllocFail,

    /// A bounded queue (tx, rx, or accept) is full.
    #[error("queue full")]
    QueueFull,

    /// `send` was called on a connection that is not `OPEN`.
    #[error("connection is not open")]
    StateViolation,

    /// `active_open` did not reach `OPEN` within its timeout, even after
    /// the half-open retry.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// `send` did not find window space within its timeout.
    #[error("send timed out waiting for window space")]
    SendTimeout,
}

pub type Result<T> = core::result::Result<T, Error>;
