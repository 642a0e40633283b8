//! Extended-acknowledgement payload: a list of 16-bit big-endian sequence
//! numbers, one per out-of-order segment the receiver currently holds
//! (§6). Per the design-note resolution of the original EACK arithmetic
//! ambiguity (§9), the word count is taken strictly as
//! `payload_len / 2`, bounded to whole words; a trailing odd byte is
//! ignored rather than read as garbage.

use byteorder::{BigEndian, ByteOrder};

use super::header::SeqNr;

/// Reads the sequence numbers out of an EACK payload, in wire order.
pub struct EackReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> EackReader<'a> {
    pub fn new(payload: &'a [u8]) -> EackReader<'a> {
        EackReader { payload, pos: 0 }
    }

    /// Number of complete 16-bit words in the payload.
    pub fn len(&self) -> usize {
        self.payload.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for EackReader<'_> {
    type Item = SeqNr;

    fn next(&mut self) -> Option<SeqNr> {
        if self.pos + 2 > self.payload.len() {
            return None;
        }
        let value = BigEndian::read_u16(&self.payload[self.pos..self.pos + 2]);
        self.pos += 2;
        Some(SeqNr(value))
    }
}

/// Builds an EACK payload from an iterator of held sequence numbers.
pub struct EackWriter {
    buf: Vec<u8>,
}

impl EackWriter {
    pub fn new() -> EackWriter {
        EackWriter { buf: Vec::new() }
    }

    pub fn push(&mut self, seq_nr: SeqNr) {
        let mut word = [0u8; 2];
        BigEndian::write_u16(&mut word, seq_nr.0);
        self.buf.extend_from_slice(&word);
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EackWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<SeqNr> for EackWriter {
    fn from_iter<I: IntoIterator<Item = SeqNr>>(iter: I) -> Self {
        let mut writer = EackWriter::new();
        for seq_nr in iter {
            writer.push(seq_nr);
        }
        writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_preserves_order() {
        let writer: EackWriter = [SeqNr(13), SeqNr(14), SeqNr(20)].into_iter().collect();
        let payload = writer.into_payload();
        let read: Vec<SeqNr> = EackReader::new(&payload).collect();
        assert_eq!(read, vec![SeqNr(13), SeqNr(14), SeqNr(20)]);
    }

    #[test]
    fn trailing_odd_byte_is_ignored() {
        let payload = [0u8, 13, 0];
        let reader = EackReader::new(&payload);
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.collect::<Vec<_>>(), vec![SeqNr(13)]);
    }

    #[test]
    fn empty_payload_is_empty() {
        assert!(EackReader::new(&[]).is_empty());
    }
}
