use byteorder::{BigEndian, ByteOrder};

/// Number of 32-bit big-endian words in a SYN parameter block (§3).
pub const SYN_WORDS: usize = 6;

/// Size, in bytes, of a SYN parameter block.
pub const SYN_PAYLOAD_LEN: usize = SYN_WORDS * 4;

/// Read the six 32-bit big-endian words carried as payload on a SYN packet.
pub fn read_words(payload: &[u8; SYN_PAYLOAD_LEN]) -> [u32; SYN_WORDS] {
    let mut words = [0u32; SYN_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = BigEndian::read_u32(&payload[i * 4..i * 4 + 4]);
    }
    words
}

/// Write six 32-bit words as a SYN parameter block.
pub fn write_words(words: [u32; SYN_WORDS]) -> [u8; SYN_PAYLOAD_LEN] {
    let mut payload = [0u8; SYN_PAYLOAD_LEN];
    for (i, word) in words.iter().enumerate() {
        BigEndian::write_u32(&mut payload[i * 4..i * 4 + 4], *word);
    }
    payload
}
