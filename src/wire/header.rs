use byteorder::{BigEndian, ByteOrder};
use core::fmt;

use super::{Error, Result};

/// Sequence/acknowledgement number. Sixteen bits, unsigned, no wraparound
/// handling (see crate-level design notes — this is a documented, inherited
/// limitation, not an oversight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqNr(pub u16);

impl SeqNr {
    pub const fn new(value: u16) -> SeqNr {
        SeqNr(value)
    }

    pub fn wrapping_add(self, delta: u16) -> SeqNr {
        SeqNr(self.0.wrapping_add(delta))
    }

    pub fn wrapping_sub(self, delta: u16) -> SeqNr {
        SeqNr(self.0.wrapping_sub(delta))
    }
}

impl fmt::Display for SeqNr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNr {
    fn from(value: u16) -> SeqNr {
        SeqNr(value)
    }
}

impl From<SeqNr> for u16 {
    fn from(value: SeqNr) -> u16 {
        value.0
    }
}

mod field {
    pub type Field = core::ops::Range<usize>;

    pub const FLAGS: usize = 0;
    // byte 1 is reserved/padding, present only to round the header to 6
    // bytes (natural alignment of the trailing u16 fields).
    pub const SEQ_NR: Field = 2..4;
    pub const ACK_NR: Field = 4..6;
}

/// Size, in bytes, of the RDP header (§3).
pub const HEADER_LEN: usize = 6;

/// Control bits carried in the header's single flags byte, packed
/// MSB-to-LSB as `reserved(4) syn ack eak rst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub eak: bool,
    pub rst: bool,
}

impl Flags {
    const SYN_BIT: u8 = 0b0000_1000;
    const ACK_BIT: u8 = 0b0000_0100;
    const EAK_BIT: u8 = 0b0000_0010;
    const RST_BIT: u8 = 0b0000_0001;

    pub const fn from_byte(byte: u8) -> Flags {
        Flags {
            syn: byte & Self::SYN_BIT != 0,
            ack: byte & Self::ACK_BIT != 0,
            eak: byte & Self::EAK_BIT != 0,
            rst: byte & Self::RST_BIT != 0,
        }
    }

    pub const fn to_byte(self) -> u8 {
        (if self.syn { Self::SYN_BIT } else { 0 })
            | (if self.ack { Self::ACK_BIT } else { 0 })
            | (if self.eak { Self::EAK_BIT } else { 0 })
            | (if self.rst { Self::RST_BIT } else { 0 })
    }

    pub const fn bare_ack() -> Flags {
        Flags {
            syn: false,
            ack: true,
            eak: false,
            rst: false,
        }
    }
}

impl Repr {
    pub const fn ack(seq_nr: SeqNr, ack_nr: SeqNr) -> Repr {
        Repr {
            flags: Flags::bare_ack(),
            seq_nr,
            ack_nr,
        }
    }
}

/// A read/write wrapper around an RDP-framed datagram payload. The header
/// occupies the *last* [`HEADER_LEN`] bytes of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn header_offset(&self) -> usize {
        self.buffer.as_ref().len() - HEADER_LEN
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        let offset = self.header_offset();
        Flags::from_byte(self.buffer.as_ref()[offset + field::FLAGS])
    }

    #[inline]
    pub fn seq_nr(&self) -> SeqNr {
        let offset = self.header_offset();
        let data = self.buffer.as_ref();
        SeqNr(BigEndian::read_u16(&data[offset + field::SEQ_NR.start..offset + field::SEQ_NR.end]))
    }

    #[inline]
    pub fn ack_nr(&self) -> SeqNr {
        let offset = self.header_offset();
        let data = self.buffer.as_ref();
        SeqNr(BigEndian::read_u16(&data[offset + field::ACK_NR.start..offset + field::ACK_NR.end]))
    }

    /// Length of the application payload preceding the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.header_offset()
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let data = self.buffer.as_ref();
        &data[..data.len() - HEADER_LEN]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    #[inline]
    pub fn set_flags(&mut self, value: Flags) {
        let offset = self.header_offset();
        self.buffer.as_mut()[offset + field::FLAGS] = value.to_byte();
    }

    #[inline]
    pub fn set_seq_nr(&mut self, value: SeqNr) {
        let offset = self.header_offset();
        let data = self.buffer.as_mut();
        BigEndian::write_u16(&mut data[offset + field::SEQ_NR.start..offset + field::SEQ_NR.end], value.0);
    }

    #[inline]
    pub fn set_ack_nr(&mut self, value: SeqNr) {
        let offset = self.header_offset();
        let data = self.buffer.as_mut();
        BigEndian::write_u16(&mut data[offset + field::ACK_NR.start..offset + field::ACK_NR.end], value.0);
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// A high-level, validated representation of an RDP header (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub flags: Flags,
    pub seq_nr: SeqNr,
    pub ack_nr: SeqNr,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;
        Ok(Repr {
            flags: packet.flags(),
            seq_nr: packet.seq_nr(),
            ack_nr: packet.ack_nr(),
        })
    }

    pub const fn header_len(&self) -> usize {
        HEADER_LEN
    }

    /// Reserve `HEADER_LEN` trailing bytes onto `buffer` (which must already
    /// hold the application payload), zero them, and write `self` into
    /// them. Mirrors `csp_rdp_header_add` + the seq/ack/flags assignment in
    /// the reference implementation.
    pub fn emit(&self, buffer: &mut Vec<u8>) {
        let start = buffer.len();
        buffer.resize(start + HEADER_LEN, 0);
        let mut packet = Packet::new_unchecked(&mut buffer[start..]);
        packet.set_flags(self.flags);
        packet.set_seq_nr(self.seq_nr);
        packet.set_ack_nr(self.ack_nr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RDP syn={} ack={} eak={} rst={} seq={} ack_nr={}",
            self.flags.syn as u8,
            self.flags.ack as u8,
            self.flags.eak as u8,
            self.flags.rst as u8,
            self.seq_nr,
            self.ack_nr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let repr = Repr {
            flags: Flags {
                syn: true,
                ack: true,
                eak: false,
                rst: false,
            },
            seq_nr: SeqNr(1001),
            ack_nr: SeqNr(2000),
        };
        let mut buf = b"hello".to_vec();
        repr.emit(&mut buf);
        assert_eq!(buf.len(), 5 + HEADER_LEN);

        let view = Packet::new_checked(&buf[..]).unwrap();
        let parsed = Repr::parse(&view).unwrap();
        assert_eq!(parsed, repr);
        assert_eq!(view.payload(), b"hello");
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buf = [0u8; HEADER_LEN - 1];
        assert!(Packet::new_checked(&buf[..]).is_err());
    }

    #[test]
    fn flags_byte_round_trips() {
        let flags = Flags {
            syn: false,
            ack: true,
            eak: true,
            rst: false,
        };
        assert_eq!(Flags::from_byte(flags.to_byte()), flags);
    }

    #[test]
    fn set_ack_nr_mutates_in_place() {
        let mut buf = b"xx".to_vec();
        Repr::ack(SeqNr(5), SeqNr(6)).emit(&mut buf);
        let mut view = Packet::new_checked(&mut buf[..]).unwrap();
        view.set_ack_nr(SeqNr(42));
        assert_eq!(view.ack_nr(), SeqNr(42));
        assert_eq!(view.seq_nr(), SeqNr(5));
    }
}
