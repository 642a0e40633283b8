use heapless::Vec as HVec;

use crate::env::Packet;
use crate::wire::SeqNr;

use super::{Full, MAX_WINDOW};

/// Reassembly queue capacity: `2 * MAX_WINDOW` (§6), since the acceptance
/// window for out-of-order segments is twice the send window.
const REASSEMBLY_CAPACITY: usize = 2 * MAX_WINDOW;

/// The reassembly queue (§4.3): set semantics keyed by `seq_nr`, searched
/// linearly, bounded at `2 * MAX_WINDOW`.
#[derive(Debug, Default)]
pub struct ReassemblyQueue {
    entries: HVec<Packet, REASSEMBLY_CAPACITY>,
}

impl ReassemblyQueue {
    pub fn new() -> ReassemblyQueue {
        ReassemblyQueue {
            entries: HVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn seq_nr_of(packet: &Packet) -> Option<SeqNr> {
        packet.header().ok().map(|repr| repr.seq_nr)
    }

    pub fn contains(&self, seq_nr: SeqNr) -> bool {
        self.entries
            .iter()
            .any(|packet| Self::seq_nr_of(packet) == Some(seq_nr))
    }

    /// Insert `packet` (its header carries `seq_nr`), rejecting duplicates.
    /// Returns `Ok(true)` if inserted, `Ok(false)` if it was already
    /// present (silently dropped, per §4.3/§8 duplicate-segment handling).
    pub fn insert(&mut self, packet: Packet, seq_nr: SeqNr) -> Result<bool, Full> {
        if self.contains(seq_nr) {
            return Ok(false);
        }
        self.entries.push(packet).map_err(|_| Full)?;
        Ok(true)
    }

    /// Every sequence number currently held, for sourcing an EACK payload
    /// (§4.3, §6). Unordered; callers that need wire order should sort.
    pub fn held_seq_numbers(&self) -> impl Iterator<Item = SeqNr> + '_ {
        self.entries.iter().filter_map(Self::seq_nr_of)
    }

    /// Drain every entry in order starting at `rcv_cur + 1`, calling
    /// `deliver` for each and advancing `rcv_cur` as it goes (§4.3).
    /// Returns the final `rcv_cur`.
    pub fn drain_in_order(&mut self, mut rcv_cur: SeqNr, mut deliver: impl FnMut(Packet)) -> SeqNr {
        loop {
            let want = rcv_cur.wrapping_add(1);
            let pos = self
                .entries
                .iter()
                .position(|packet| Self::seq_nr_of(packet) == Some(want));
            match pos {
                Some(pos) => {
                    let packet = self.entries.swap_remove(pos);
                    deliver(packet);
                    rcv_cur = want;
                }
                None => break,
            }
        }
        rcv_cur
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Flags, Repr};

    fn segment(seq_nr: u16) -> Packet {
        let mut packet = Packet::with_payload(1, b"x");
        packet.push_header(Repr {
            flags: Flags {
                ack: true,
                ..Default::default()
            },
            seq_nr: SeqNr(seq_nr),
            ack_nr: SeqNr(0),
        });
        packet
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut queue = ReassemblyQueue::new();
        assert_eq!(queue.insert(segment(11), SeqNr(11)), Ok(true));
        assert_eq!(queue.insert(segment(11), SeqNr(11)), Ok(false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_in_order_stops_at_first_gap() {
        let mut queue = ReassemblyQueue::new();
        queue.insert(segment(13), SeqNr(13)).unwrap();
        queue.insert(segment(14), SeqNr(14)).unwrap();

        let mut delivered = Vec::new();
        let rcv_cur = queue.drain_in_order(SeqNr(10), |packet| {
            delivered.push(packet.header().unwrap().seq_nr);
        });
        assert_eq!(rcv_cur, SeqNr(10));
        assert!(delivered.is_empty());
        assert_eq!(queue.len(), 2);

        queue.insert(segment(11), SeqNr(11)).unwrap();
        queue.insert(segment(12), SeqNr(12)).unwrap();
        let mut delivered = Vec::new();
        let rcv_cur = queue.drain_in_order(SeqNr(10), |packet| {
            delivered.push(packet.header().unwrap().seq_nr);
        });
        assert_eq!(rcv_cur, SeqNr(14));
        assert_eq!(
            delivered,
            vec![SeqNr(11), SeqNr(12), SeqNr(13), SeqNr(14)]
        );
        assert!(queue.is_empty());
    }
}
