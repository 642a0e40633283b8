//! The RDP connection state machine (§4.4): the six-state automaton
//! `CLOSED -> LISTEN -> SYN_SENT -> SYN_RCVD -> OPEN -> CLOSE_WAIT ->
//! CLOSED` driving every inbound packet and outbound user operation.
//!
//! A [`Connection`] owns its queues and its environment capabilities
//! (datagram sink, packet pool) outright — there is no sharing, no
//! back-reference, consistent with the "cyclic references" design note.
//! Every method here assumes the caller already holds the global
//! [`crate::sync::RdpLock`] (§5); nothing in this module does its own
//! locking beyond the [`TxWait`] signal, which is designed to be waited on
//! with the lock released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::env::{DatagramSink, Packet, PacketPool};
use crate::error::Error;
use crate::options::Options;
use crate::sync::TxWait;
use crate::time::Instant;
use crate::wire::{EackReader, EackWriter, Flags, Repr, SeqNr};

/// `CLOSED -> LISTEN -> SYN_SENT -> SYN_RCVD -> OPEN -> CLOSE_WAIT ->
/// CLOSED` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Open,
    CloseWait,
}

/// What `recv()` hands back: either a delivered payload, in sequence-number
/// order, or the "peer reset, close me" sentinel (§5, §7).
#[derive(Debug)]
pub enum RecvItem {
    Data(Packet),
    Closed,
}

/// The first-arrival socket accept queue (§6): distinct from the sentinel
/// "already handed off" state, which is simply `None` on [`Connection`].
pub trait AcceptQueue: Send + Sync {
    /// Post `conn_id` to the queue. `Err(Error::QueueFull)` on overflow —
    /// the inbound packet that triggered the hand-off attempt is dropped,
    /// but connection state has already advanced (§7); the peer retries.
    fn accept(&self, conn_id: u16) -> Result<(), Error>;
}

/// A bounded FIFO `AcceptQueue`, suitable for a listening socket's backlog.
#[derive(Debug)]
pub struct BoundedAcceptQueue {
    capacity: usize,
    entries: Mutex<VecDeque<u16>>,
}

impl BoundedAcceptQueue {
    pub fn new(capacity: usize) -> BoundedAcceptQueue {
        BoundedAcceptQueue {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pop(&self) -> Option<u16> {
        self.entries.lock().unwrap().pop_front()
    }
}

impl AcceptQueue for BoundedAcceptQueue {
    fn accept(&self, conn_id: u16) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        entries.push_back(conn_id);
        Ok(())
    }
}

/// A handle shared between the application task(s), the reception task,
/// and the timer task that drives `tick` (§5).
pub type ConnHandle = Arc<Mutex<Connection>>;

/// Per-connection RDP state (§3).
pub struct Connection {
    conn_id: u16,
    state: State,

    snd_iss: SeqNr,
    snd_nxt: SeqNr,
    snd_una: SeqNr,

    rcv_irs: SeqNr,
    rcv_cur: SeqNr,
    rcv_lsa: SeqNr,

    ack_timestamp: Instant,
    open_timestamp: Instant,

    options: Arc<Options>,

    tx_queue: crate::storage::RetransmitQueue,
    rx_queue: crate::storage::ReassemblyQueue,
    rx_app: VecDeque<RecvItem>,

    /// `Some` until the first packet after handshake is handed off to the
    /// accept queue (§6); `None` means "already handed off" or "not
    /// applicable" (e.g. this connection was actively opened by the user,
    /// who already holds the handle).
    accept_sink: Option<Arc<dyn AcceptQueue>>,

    pub tx_wait: Arc<TxWait>,

    datagram: Arc<dyn DatagramSink>,
    pool: Arc<dyn PacketPool>,
}

impl Connection {
    /// `allocate(conn)` (§4.6): create the queues and the wake signal, set
    /// state to `CLOSED`. `options` is the defaults snapshot taken at
    /// allocation time (§9) — later `set_options` calls do not affect this
    /// connection.
    pub fn allocate(
        conn_id: u16,
        datagram: Arc<dyn DatagramSink>,
        pool: Arc<dyn PacketPool>,
        options: Arc<Options>,
    ) -> Connection {
        Connection {
            conn_id,
            state: State::Closed,
            snd_iss: SeqNr::default(),
            snd_nxt: SeqNr::default(),
            snd_una: SeqNr::default(),
            rcv_irs: SeqNr::default(),
            rcv_cur: SeqNr::default(),
            rcv_lsa: SeqNr::default(),
            ack_timestamp: Instant::default(),
            open_timestamp: Instant::default(),
            options,
            tx_queue: crate::storage::RetransmitQueue::new(),
            rx_queue: crate::storage::ReassemblyQueue::new(),
            rx_app: VecDeque::new(),
            accept_sink: None,
            tx_wait: Arc::new(TxWait::new()),
            datagram,
            pool,
        }
    }

    /// Mark this connection as passively listening: the next successfully
    /// delivered in-order segment will be posted to `queue` before being
    /// handed to the application receive queue (§6 first-arrival hand-off).
    pub fn set_accept_queue(&mut self, queue: Arc<dyn AcceptQueue>) {
        self.accept_sink = Some(queue);
    }

    pub fn conn_id(&self) -> u16 {
        self.conn_id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn rcv_cur(&self) -> SeqNr {
        self.rcv_cur
    }

    pub fn snd_una(&self) -> SeqNr {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> SeqNr {
        self.snd_nxt
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn rx_queue_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// Pop the next item (payload or close sentinel) off the application
    /// receive queue.
    pub fn recv(&mut self) -> Option<RecvItem> {
        self.rx_app.pop_front()
    }

    /// `flush_all(conn)` (§4.6): free and empty both queues.
    pub fn flush_all(&mut self) {
        self.tx_queue.clear();
        self.rx_queue.clear();
    }

    // ---- outbound: user-driven operations --------------------------------

    /// Begin an active open (§4.4 CLOSED -> SYN_SENT). Sends the SYN,
    /// queues it for retransmission. The caller is responsible for
    /// releasing the global lock and waiting on `tx_wait` (§4.6, §5).
    pub fn begin_active_open(&mut self, now: Instant) {
        self.snd_iss = SeqNr::new(1000);
        self.snd_nxt = self.snd_iss.wrapping_add(1);
        self.snd_una = self.snd_iss;
        self.state = State::SynSent;
        self.open_timestamp = now;
        let payload = self.options.to_syn_payload();
        let repr = Repr {
            flags: Flags {
                syn: true,
                ..Default::default()
            },
            seq_nr: self.snd_iss,
            ack_nr: SeqNr::default(),
        };
        let _ = self.send_and_queue(now, repr, &payload);
    }

    /// Whether the sender's window is full (§4.6 `send`): `snd_nxt -
    /// snd_una + 1 >= window_size`.
    pub fn window_full(&self) -> bool {
        let window = self.options.window_size as i64;
        (self.snd_nxt.0 as i64 - self.snd_una.0 as i64 + 1) >= window
    }

    /// `send(conn, packet, timeout_ms)` (§4.6), once the window check has
    /// already passed. Attaches the header, enqueues a retransmission
    /// copy, hands the packet to the datagram layer, and only then
    /// increments `snd_nxt` — an allocation failure propagates to the
    /// caller with no state mutated (§7 `ALLOC_FAIL`).
    pub fn send_segment(&mut self, now: Instant, payload: &[u8]) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::StateViolation);
        }
        let repr = Repr {
            flags: Flags {
                ack: true,
                ..Default::default()
            },
            seq_nr: self.snd_nxt,
            ack_nr: self.rcv_cur,
        };
        self.send_and_queue(now, repr, payload)?;
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        Ok(())
    }

    /// `close(conn)` (§4.4 "Close-from-user"): sends RST|ACK and moves to
    /// CLOSE_WAIT, or — if already in CLOSE_WAIT — moves straight to
    /// CLOSED.
    pub fn close(&mut self, now: Instant) {
        self.close_or_reset(now);
    }

    // ---- inbound: deliver() (§4.4) ----------------------------------------

    /// `deliver(conn, packet)` (§4.4): the single entry point for every
    /// inbound packet, in every state.
    pub fn deliver(&mut self, now: Instant, mut packet: Packet) {
        if self.state == State::Closed {
            // CLOSED -> LISTEN: first inbound packet on a fresh connection.
            self.snd_iss = SeqNr::new(2000);
            self.snd_nxt = self.snd_iss.wrapping_add(1);
            self.snd_una = self.snd_iss;
            self.state = State::Listen;
            self.open_timestamp = now;
        }

        let repr = match packet.header() {
            Ok(repr) => repr,
            Err(_) => {
                log::debug!("rdp[{}]: dropping truncated packet", self.conn_id);
                return;
            }
        };

        if repr.flags.rst {
            self.handle_reset(now, repr);
            return;
        }

        match self.state {
            State::Closed => unreachable!("just transitioned out of CLOSED above"),
            State::Listen => self.handle_listen(now, repr, &packet),
            State::SynSent => self.handle_syn_sent(now, repr),
            State::SynRcvd | State::Open => self.handle_established(now, repr, packet),
            State::CloseWait => {
                // Only an RST (handled above) does anything in CLOSE_WAIT.
            }
        }
    }

    fn handle_listen(&mut self, now: Instant, repr: Repr, packet: &Packet) {
        if repr.flags.ack && !repr.flags.syn {
            let _ = self.send_control(
                now,
                Repr {
                    flags: Flags {
                        rst: true,
                        ..Default::default()
                    },
                    seq_nr: self.snd_nxt,
                    ack_nr: SeqNr::default(),
                },
            );
            self.state = State::Closed;
            self.flush_all();
            return;
        }

        if repr.flags.syn {
            self.rcv_cur = repr.seq_nr;
            self.rcv_irs = repr.seq_nr;
            self.rcv_lsa = repr.seq_nr;

            let payload = packet.payload();
            if payload.len() == crate::wire::SYN_PAYLOAD_LEN {
                let mut buf = [0u8; crate::wire::SYN_PAYLOAD_LEN];
                buf.copy_from_slice(payload);
                self.options = Arc::new(Options::from_syn_payload(&buf));
            } else {
                log::warn!(
                    "rdp[{}]: SYN with malformed parameter block, keeping defaults",
                    self.conn_id
                );
            }

            let repr = Repr {
                flags: Flags {
                    syn: true,
                    ack: true,
                    ..Default::default()
                },
                seq_nr: self.snd_iss,
                ack_nr: self.rcv_irs,
            };
            let _ = self.send_and_queue(now, repr, &[]);
            self.state = State::SynRcvd;
            self.open_timestamp = now;
        }
        // Anything else arriving in LISTEN (bare data, EACK, ...) is
        // discarded silently.
    }

    fn handle_syn_sent(&mut self, now: Instant, repr: Repr) {
        if repr.flags.syn && repr.flags.ack {
            self.rcv_cur = repr.seq_nr;
            self.rcv_irs = repr.seq_nr;
            self.snd_una = repr.ack_nr.wrapping_add(1);
            self.state = State::Open;
            if !self.options.delayed_acks {
                let _ = self.send_control(
                    now,
                    Repr {
                        flags: Flags {
                            ack: true,
                            ..Default::default()
                        },
                        seq_nr: self.snd_nxt,
                        ack_nr: self.rcv_cur,
                    },
                );
            } else {
                self.rcv_lsa = self.rcv_cur.wrapping_sub(1);
            }
            self.tx_wait.signal();
        } else if repr.flags.ack {
            // Half-open peer: it believes this connection is already open.
            let _ = self.send_control(
                now,
                Repr {
                    flags: Flags {
                        rst: true,
                        ..Default::default()
                    },
                    seq_nr: self.snd_nxt,
                    ack_nr: SeqNr::default(),
                },
            );
            self.flush_all();
            self.tx_wait.signal();
        } else {
            self.state = State::Closed;
            self.flush_all();
        }
    }

    fn handle_established(&mut self, now: Instant, repr: Repr, mut packet: Packet) {
        if repr.flags.syn || !repr.flags.ack {
            self.close_or_reset(now);
            return;
        }

        let window = self.options.window_size as i64;
        let rcv_cur_v = self.rcv_cur.0 as i64;
        let seq_v = repr.seq_nr.0 as i64;
        let seq_acceptable = seq_v > rcv_cur_v && seq_v <= rcv_cur_v + 2 * window;
        if !seq_acceptable {
            if self.state == State::SynRcvd {
                let _ = self.send_control(
                    now,
                    Repr {
                        flags: Flags {
                            syn: true,
                            ack: true,
                            ..Default::default()
                        },
                        seq_nr: self.snd_iss,
                        ack_nr: self.rcv_irs,
                    },
                );
            } else {
                self.send_eack(now);
            }
            return;
        }

        let snd_una_v = self.snd_una.0 as i64;
        let snd_nxt_v = self.snd_nxt.0 as i64;
        let ack_v = repr.ack_nr.0 as i64;
        let ack_acceptable = ack_v >= snd_una_v - 1 - 2 * window && ack_v < snd_nxt_v;
        if !ack_acceptable {
            self.close_or_reset(now);
            return;
        }
        self.snd_una = repr.ack_nr.wrapping_add(1);
        if self.state == State::SynRcvd && repr.ack_nr == self.snd_iss {
            self.state = State::Open;
        }

        if repr.flags.eak && !packet.payload().is_empty() {
            let held: Vec<SeqNr> = EackReader::new(packet.payload()).collect();
            self.tx_queue
                .flush_eack(&held, now, self.options.packet_timeout());
            return;
        }

        if packet.payload().is_empty() {
            return;
        }

        if repr.seq_nr == self.rcv_cur.wrapping_add(1) {
            if !self.try_handoff() {
                log::debug!(
                    "rdp[{}]: accept queue full, dropping segment {}",
                    self.conn_id,
                    repr.seq_nr
                );
                return;
            }

            let _ = packet.pop_header();
            self.rx_app.push_back(RecvItem::Data(packet));
            self.rcv_cur = repr.seq_nr;

            let rx_app = &mut self.rx_app;
            self.rcv_cur = self.rx_queue.drain_in_order(self.rcv_cur, |mut drained| {
                let _ = drained.pop_header();
                rx_app.push_back(RecvItem::Data(drained));
            });

            let ack_delay_count = self.options.ack_delay_count as i64;
            let should_ack = !self.options.delayed_acks
                || (self.rcv_cur.0 as i64) > (self.rcv_lsa.0 as i64 + ack_delay_count);
            if should_ack {
                let _ = self.send_control(
                    now,
                    Repr {
                        flags: Flags {
                            ack: true,
                            ..Default::default()
                        },
                        seq_nr: self.snd_nxt,
                        ack_nr: self.rcv_cur,
                    },
                );
            }
        } else {
            let _ = self.rx_queue.insert(packet, repr.seq_nr);
            self.send_eack(now);
        }
    }

    fn handle_reset(&mut self, now: Instant, repr: Repr) {
        if repr.flags.ack {
            self.snd_una = repr.ack_nr.wrapping_add(1);
        }
        if self.state == State::CloseWait {
            self.state = State::Closed;
            self.flush_all();
            return;
        }
        if repr.seq_nr == self.rcv_cur.wrapping_add(1) {
            let _ = self.send_control(
                now,
                Repr {
                    flags: Flags {
                        rst: true,
                        ack: true,
                        ..Default::default()
                    },
                    seq_nr: self.snd_nxt,
                    ack_nr: self.rcv_cur,
                },
            );
            self.state = State::CloseWait;
            self.open_timestamp = now;
            self.rx_app.push_back(RecvItem::Closed);
        }
        // Out-of-sequence RST: discard, keep the connection open.
    }

    /// Shared mechanics behind user-initiated close, invalid flags, and
    /// out-of-range ACKs (§4.4 "Close-from-user", §7 `INVALID_FLAGS` /
    /// `ACK_OUT_OF_RANGE`): send RST|ACK and move to CLOSE_WAIT, or — if
    /// already there — move straight to CLOSED.
    fn close_or_reset(&mut self, now: Instant) {
        if self.state != State::CloseWait {
            let _ = self.send_control(
                now,
                Repr {
                    flags: Flags {
                        rst: true,
                        ack: true,
                        ..Default::default()
                    },
                    seq_nr: self.snd_nxt,
                    ack_nr: self.rcv_cur,
                },
            );
            self.state = State::CloseWait;
            self.open_timestamp = now;
        } else {
            self.state = State::Closed;
            self.flush_all();
        }
    }

    /// First-arrival socket hand-off (§6). Returns `false` if the accept
    /// queue rejected the hand-off (`QUEUE_FULL`) — the caller should drop
    /// the inbound data without otherwise disturbing connection state.
    fn try_handoff(&mut self) -> bool {
        let Some(sink) = self.accept_sink.clone() else {
            return true;
        };
        match sink.accept(self.conn_id) {
            Ok(()) => {
                self.accept_sink = None;
                true
            }
            Err(_) => false,
        }
    }

    // ---- timeout engine (§4.5) ---------------------------------------------

    /// `tick(connection)` (§4.5): run under the RDP lock, in order:
    /// accept-queue idle timeout, CLOSE_WAIT timeout, retransmission
    /// sweep, delayed-ACK timeout, sender wake.
    pub fn tick(&mut self, now: Instant) {
        if self.accept_sink.is_some()
            && now.saturating_duration_since(self.open_timestamp) > self.options.conn_timeout()
        {
            log::debug!("rdp[{}]: accept-queue idle timeout", self.conn_id);
            self.state = State::Closed;
            self.flush_all();
            return;
        }

        if self.state == State::CloseWait
            && now.saturating_duration_since(self.open_timestamp) > self.options.conn_timeout()
        {
            log::debug!("rdp[{}]: CLOSE_WAIT timeout, connection closed", self.conn_id);
            self.state = State::Closed;
            self.flush_all();
            return;
        }

        let snd_una = self.snd_una;
        let rcv_cur = self.rcv_cur;
        let packet_timeout = self.options.packet_timeout();
        let datagram = self.datagram.clone();
        self.tx_queue
            .sweep_timeouts(now, snd_una, packet_timeout, rcv_cur, |packet| {
                datagram.send_datagram(packet);
            });

        if self.rcv_lsa < self.rcv_cur
            && now.saturating_duration_since(self.ack_timestamp) > self.options.ack_timeout()
        {
            let _ = self.send_control(
                now,
                Repr {
                    flags: Flags {
                        ack: true,
                        ..Default::default()
                    },
                    seq_nr: self.snd_nxt,
                    ack_nr: self.rcv_cur,
                },
            );
        }

        if self.state == State::Open {
            let window = self.options.window_size as i64;
            let within_tx_room = (self.tx_queue.len() as i64) < window - 1;
            let within_send_room = (self.snd_nxt.0 as i64) < (self.snd_una.0 as i64 + 2 * window);
            if within_tx_room && within_send_room {
                self.tx_wait.signal();
            }
        }
    }

    // ---- control-packet plumbing -------------------------------------------

    fn send_eack(&mut self, now: Instant) {
        let mut held: Vec<SeqNr> = self.rx_queue.held_seq_numbers().collect();
        held.sort();
        let payload: EackWriter = held.iter().copied().collect();
        let repr = Repr {
            flags: Flags {
                ack: true,
                eak: true,
                ..Default::default()
            },
            seq_nr: self.snd_nxt,
            ack_nr: self.rcv_cur,
        };
        let _ = self.send_control_with_payload(now, repr, &payload.into_payload());
    }

    fn send_control(&mut self, now: Instant, repr: Repr) -> Result<(), Error> {
        self.send_control_with_payload(now, repr, &[])
    }

    /// Allocation failure propagates to the caller (§7 `ALLOC_FAIL`)
    /// instead of being swallowed; nothing is sent and no state changes.
    fn send_control_with_payload(
        &mut self,
        now: Instant,
        repr: Repr,
        payload: &[u8],
    ) -> Result<(), Error> {
        let Some(mut packet) = self.pool.alloc_packet(self.conn_id) else {
            log::error!("rdp[{}]: control packet allocation failed", self.conn_id);
            return Err(Error::AllocFail);
        };
        packet.extend_payload(payload);
        packet.push_header(repr);
        self.datagram.send_datagram(&packet);
        if repr.flags.ack {
            self.rcv_lsa = repr.ack_nr;
            self.ack_timestamp = now;
        }
        self.pool.free_packet(packet);
        Ok(())
    }

    /// Send a segment that must survive on the retransmission queue (SYN,
    /// SYN|ACK, or a data segment). Allocation failure propagates to the
    /// caller (§7 `ALLOC_FAIL`) instead of being swallowed; nothing is
    /// sent, queued, or mutated.
    fn send_and_queue(&mut self, now: Instant, repr: Repr, payload: &[u8]) -> Result<(), Error> {
        let Some(mut packet) = self.pool.alloc_packet(self.conn_id) else {
            log::error!("rdp[{}]: packet allocation failed", self.conn_id);
            return Err(Error::AllocFail);
        };
        packet.extend_payload(payload);
        packet.push_header(repr);
        self.datagram.send_datagram(&packet);
        if repr.flags.ack {
            self.rcv_lsa = repr.ack_nr;
            self.ack_timestamp = now;
        }
        if self.tx_queue.enqueue(packet, now).is_err() {
            log::warn!(
                "rdp[{}]: tx_queue full, dropping retransmission copy",
                self.conn_id
            );
        }
        Ok(())
    }
}
