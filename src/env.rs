//! The capabilities the core is polymorphic over (§6, §9): sending a
//! datagram, allocating/freeing packet buffers, and reading the clock.
//! Production code wires in real implementations; tests wire in an
//! in-memory fabric and a [`crate::time::VirtualClock`].

use heapless::Vec as HVec;

use crate::wire;

/// Maximum size, in bytes, of one RDP-framed datagram (payload + header),
/// matching the fixed-capacity buffer pool a resource-constrained node
/// would carve packets out of.
pub const MAX_PACKET_LEN: usize = 512;

/// An opaque, fixed-capacity datagram buffer (§3): a mutable length, a
/// destination/connection identifier, and a byte payload. The trailing
/// [`wire::HEADER_LEN`] bytes hold the RDP header once framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub conn_id: u16,
    buf: HVec<u8, MAX_PACKET_LEN>,
}

impl Packet {
    /// An empty packet bound for `conn_id`.
    pub fn new(conn_id: u16) -> Packet {
        Packet {
            conn_id,
            buf: HVec::new(),
        }
    }

    /// A packet carrying `payload` as its (unframed) application data.
    pub fn with_payload(conn_id: u16, payload: &[u8]) -> Packet {
        let mut packet = Packet::new(conn_id);
        packet.buf.extend_from_slice(payload).expect("payload exceeds MAX_PACKET_LEN");
        packet
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Append raw bytes (e.g. a SYN parameter block or EACK payload) to the
    /// still-unframed buffer, ahead of `push_header`.
    pub fn extend_payload(&mut self, bytes: &[u8]) {
        self.buf
            .extend_from_slice(bytes)
            .expect("payload exceeds MAX_PACKET_LEN");
    }

    /// Peek the RDP header without mutating length (§4.1 "Peek").
    pub fn header(&self) -> wire::Result<wire::Repr> {
        let view = wire::Packet::new_checked(self.buf.as_slice())?;
        wire::Repr::parse(&view)
    }

    /// The application payload, i.e. everything before the trailing header.
    pub fn payload(&self) -> &[u8] {
        let header_len = wire::HEADER_LEN.min(self.buf.len());
        &self.buf[..self.buf.len() - header_len]
    }

    /// Append `repr` as the trailing header (§4.1 "Add"). The buffer must
    /// currently hold only the application payload.
    pub fn push_header(&mut self, repr: wire::Repr) {
        let mut owned: Vec<u8> = self.buf.iter().copied().collect();
        repr.emit(&mut owned);
        self.buf = HVec::from_slice(&owned).expect("framed packet exceeds MAX_PACKET_LEN");
    }

    /// Rewrite the `ack_nr` field of an already-framed packet in place
    /// (used when a retransmitted segment is re-stamped with a fresh
    /// `rcv_cur`, §4.2).
    pub fn set_ack_nr(&mut self, ack_nr: wire::SeqNr) {
        if let Ok(mut view) = wire::Packet::new_checked(self.buf.as_mut_slice()) {
            view.set_ack_nr(ack_nr);
        }
    }

    /// Remove the trailing header, shrinking the length (§4.1 "Remove"),
    /// and return it.
    pub fn pop_header(&mut self) -> wire::Result<wire::Repr> {
        let repr = self.header()?;
        let new_len = self.buf.len() - wire::HEADER_LEN;
        self.buf.truncate(new_len);
        Ok(repr)
    }
}

/// Best-effort datagram transmit (`send_datagram`, §1/§6). The datagram
/// layer below — addressing, routing, fragmentation — is out of scope;
/// this is the one primitive the core uses to reach it.
pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, packet: &Packet) -> bool;
}

/// Packet buffer pool (`alloc_packet`/`free_packet`, §1/§6). `free_packet`
/// has no Rust-level effect beyond dropping the packet — ownership and
/// `Drop` already give us that — but the trait is kept so a real pool
/// allocator (e.g. a fixed-size slab) can track live-buffer accounting the
/// way the reference implementation does.
pub trait PacketPool: Send + Sync {
    fn alloc_packet(&self, conn_id: u16) -> Option<Packet>;

    fn free_packet(&self, _packet: Packet) {}
}

/// The default pool: plain allocation, no exhaustion. Good enough for
/// tests and for hosts that don't need admission control.
#[derive(Debug, Default)]
pub struct UnboundedPool;

impl PacketPool for UnboundedPool {
    fn alloc_packet(&self, conn_id: u16) -> Option<Packet> {
        Some(Packet::new(conn_id))
    }
}

/// An in-memory datagram fabric for tests: packets `send_datagram`'d to it
/// are collected for inspection and/or manual redelivery to a peer
/// connection via [`crate::api::deliver`].
#[derive(Debug, Default)]
pub struct LoopbackFabric {
    sent: std::sync::Mutex<Vec<Packet>>,
}

impl LoopbackFabric {
    pub fn new() -> LoopbackFabric {
        LoopbackFabric {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Drain every packet sent through this fabric since the last drain.
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl DatagramSink for LoopbackFabric {
    fn send_datagram(&self, packet: &Packet) -> bool {
        self.sent.lock().unwrap().push(packet.clone());
        true
    }
}
