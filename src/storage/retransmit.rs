use heapless::Vec as HVec;

use crate::env::Packet;
use crate::time::Instant;
use crate::wire::SeqNr;

use super::{Full, MAX_WINDOW};

/// One outstanding, unacknowledged segment (§3): the time it was last
/// (re)transmitted, and the segment itself (its own header carries its
/// `seq_nr`).
#[derive(Debug, Clone)]
pub struct RetransmitEntry {
    pub timestamp: Instant,
    pub packet: Packet,
}

impl RetransmitEntry {
    fn seq_nr(&self) -> Option<SeqNr> {
        self.packet.header().ok().map(|repr| repr.seq_nr)
    }
}

/// The retransmission queue (§4.2): ordered by insertion, bounded at
/// [`MAX_WINDOW`], scanned linearly by `tick`'s timeout sweep and by EACK
/// processing.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    entries: HVec<RetransmitEntry, MAX_WINDOW>,
}

impl RetransmitQueue {
    pub fn new() -> RetransmitQueue {
        RetransmitQueue {
            entries: HVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enqueue(&mut self, packet: Packet, timestamp: Instant) -> Result<(), Full> {
        self.entries
            .push(RetransmitEntry { timestamp, packet })
            .map_err(|_| Full)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetransmitEntry> {
        self.entries.iter()
    }

    /// Timeout sweep (§4.2): drop everything the peer has already
    /// acknowledged (`seq_nr < snd_una`); retransmit anything that has sat
    /// past `packet_timeout`, refreshing its `ack_nr` and timestamp; leave
    /// everything else untouched. `retransmit` is called with a freshly
    /// stamped clone and should hand it to the datagram layer; its return
    /// value is ignored here exactly as the reference sweep ignores
    /// `send_datagram`'s result (a dropped retransmit is simply retried on
    /// the next sweep).
    pub fn sweep_timeouts(
        &mut self,
        now: Instant,
        snd_una: SeqNr,
        packet_timeout: crate::time::Duration,
        rcv_cur: SeqNr,
        mut retransmit: impl FnMut(&Packet),
    ) {
        let mut kept: HVec<RetransmitEntry, MAX_WINDOW> = HVec::new();
        for mut entry in core::mem::take(&mut self.entries) {
            let seq_nr = match entry.seq_nr() {
                Some(seq_nr) => seq_nr,
                None => continue,
            };
            if seq_nr < snd_una {
                continue;
            }
            if now.saturating_duration_since(entry.timestamp) >= packet_timeout {
                entry.packet.set_ack_nr(rcv_cur);
                entry.timestamp = now;
                retransmit(&entry.packet);
            }
            let _ = kept.push(entry);
        }
        self.entries = kept;
    }

    /// EACK flush (§4.2): drop entries whose `seq_nr` is listed in `held`;
    /// for survivors whose `seq_nr` is less than the highest held seq_nr,
    /// force an immediate retransmit on the next timeout sweep by backdating
    /// their timestamp.
    pub fn flush_eack(
        &mut self,
        held: &[SeqNr],
        now: Instant,
        packet_timeout: crate::time::Duration,
    ) {
        let max_held = match held.iter().max() {
            Some(max) => *max,
            None => return,
        };
        let mut kept: HVec<RetransmitEntry, MAX_WINDOW> = HVec::new();
        for mut entry in core::mem::take(&mut self.entries) {
            let seq_nr = match entry.seq_nr() {
                Some(seq_nr) => seq_nr,
                None => continue,
            };
            if held.contains(&seq_nr) {
                continue;
            }
            if seq_nr < max_held {
                entry.timestamp = now - packet_timeout;
            }
            let _ = kept.push(entry);
        }
        self.entries = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;
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
    fn sweep_drops_acknowledged_and_retransmits_timed_out() {
        let mut queue = RetransmitQueue::new();
        queue
            .enqueue(segment(5), Instant::from_millis(0))
            .unwrap();
        queue
            .enqueue(segment(6), Instant::from_millis(900))
            .unwrap();

        let mut retransmitted = Vec::new();
        queue.sweep_timeouts(
            Instant::from_millis(1000),
            SeqNr(6), // seq 5 already acknowledged
            Duration::from_millis(500),
            SeqNr(20),
            |packet| retransmitted.push(packet.header().unwrap().seq_nr),
        );

        assert_eq!(retransmitted, vec![]);
        assert_eq!(queue.len(), 1);

        let mut retransmitted = Vec::new();
        queue.sweep_timeouts(
            Instant::from_millis(1500),
            SeqNr(6),
            Duration::from_millis(500),
            SeqNr(20),
            |packet| retransmitted.push(packet.header().unwrap().seq_nr),
        );
        assert_eq!(retransmitted, vec![SeqNr(6)]);
        assert_eq!(
            queue.iter().next().unwrap().packet.header().unwrap().ack_nr,
            SeqNr(20)
        );
    }

    #[test]
    fn eack_flush_drops_held_and_forces_retransmit_below_max() {
        let mut queue = RetransmitQueue::new();
        queue.enqueue(segment(5), Instant::from_millis(0)).unwrap();
        queue.enqueue(segment(6), Instant::from_millis(0)).unwrap();
        queue.enqueue(segment(7), Instant::from_millis(0)).unwrap();

        queue.flush_eack(&[SeqNr(6)], Instant::from_millis(100), Duration::from_millis(50));

        assert_eq!(queue.len(), 2);
        let seq_nrs: Vec<SeqNr> = queue
            .iter()
            .map(|entry| entry.packet.header().unwrap().seq_nr)
            .collect();
        assert_eq!(seq_nrs, vec![SeqNr(5), SeqNr(7)]);
        // seq 5 is below the highest held seq (6): backdated to force a
        // retransmit on the next sweep.
        let entry5 = queue
            .iter()
            .find(|entry| entry.packet.header().unwrap().seq_nr == SeqNr(5))
            .unwrap();
        assert_eq!(entry5.timestamp, Instant::from_millis(50));
    }
}
