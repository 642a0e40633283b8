/*! Wire representation of RDP packets.

Mirrors the split used elsewhere in this crate's wire layer: a `Packet<T>`
family gives raw, panic-free field access over a byte buffer, while a
`Repr` family gives a convenient, validated, in-memory value that can be
`parse`d from and `emit`ted into a buffer.

Unlike a typical network-layer header, the 6-byte RDP header (§3) lives at
the *trailing* end of the datagram payload, not the front — so `Packet<T>`
here indexes from `buffer.len() - HEADER_LEN` rather than from zero.
*/

use core::fmt;

mod eack;
mod header;
pub mod syn;

pub use eack::{EackReader, EackWriter};
pub use header::{Flags, Packet, Repr, SeqNr, HEADER_LEN};
pub use syn::{SYN_PAYLOAD_LEN, SYN_WORDS};

/// Parsing a buffer as an RDP header failed (too short).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "truncated RDP header")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
