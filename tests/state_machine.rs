//! Scenario tests driving [`Connection`] directly, without the blocking
//! [`rdp_core::api::Runtime`] surface or real threads — deterministic, and
//! free to hand-craft out-of-sequence and malformed inbound packets.

use std::sync::Arc;

use rdp_core::env::{DatagramSink, LoopbackFabric, Packet, UnboundedPool};
use rdp_core::options::Options;
use rdp_core::socket::{Connection, RecvItem, State};
use rdp_core::time::Instant;
use rdp_core::wire::{Flags, Repr, SeqNr};

/// Passive ISS chosen by `Connection::deliver`'s CLOSED -> LISTEN
/// transition (see `socket::rdp`).
const PASSIVE_ISS: u16 = 2000;

fn inbound(seq_nr: u16, ack_nr: u16, flags: Flags, payload: &[u8]) -> Packet {
    let mut packet = Packet::with_payload(1, payload);
    packet.push_header(Repr {
        flags,
        seq_nr: SeqNr::new(seq_nr),
        ack_nr: SeqNr::new(ack_nr),
    });
    packet
}

fn syn_payload() -> Vec<u8> {
    Options::default().to_syn_payload().to_vec()
}

/// Drive a fresh connection through a three-way handshake as the passive
/// side, leaving it `OPEN` with `rcv_cur == active_iss`.
fn open_passive_connection(active_iss: u16, datagram: Arc<LoopbackFabric>) -> Connection {
    let mut conn = Connection::allocate(1, datagram, Arc::new(UnboundedPool), Arc::new(Options::default()));
    conn.deliver(
        Instant::from_millis(0),
        inbound(
            active_iss,
            0,
            Flags {
                syn: true,
                ..Default::default()
            },
            &syn_payload(),
        ),
    );
    assert_eq!(conn.state(), State::SynRcvd);

    conn.deliver(
        Instant::from_millis(1),
        inbound(
            active_iss.wrapping_add(1),
            PASSIVE_ISS,
            Flags {
                ack: true,
                ..Default::default()
            },
            &[],
        ),
    );
    assert_eq!(conn.state(), State::Open);
    conn
}

#[test]
fn out_of_order_delivery_with_eack() {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut conn = open_passive_connection(1000, fabric.clone());
    assert_eq!(conn.rcv_cur(), SeqNr::new(1000));
    fabric.drain();

    let ack_nr = PASSIVE_ISS;
    let data = |seq: u16, flags_eak: bool, payload: &'static [u8]| {
        inbound(
            seq,
            ack_nr,
            Flags {
                ack: true,
                eak: flags_eak,
                ..Default::default()
            },
            payload,
        )
    };

    conn.deliver(Instant::from_millis(10), data(1001, false, b"d1"));
    assert_eq!(conn.rcv_cur(), SeqNr::new(1001));

    conn.deliver(Instant::from_millis(20), data(1003, false, b"d3"));
    assert_eq!(conn.rcv_cur(), SeqNr::new(1001));
    assert_eq!(conn.rx_queue_len(), 1);

    conn.deliver(Instant::from_millis(30), data(1004, false, b"d4"));
    assert_eq!(conn.rcv_cur(), SeqNr::new(1001));
    assert_eq!(conn.rx_queue_len(), 2);

    let sent = fabric.drain();
    assert!(sent.iter().any(|packet| packet.header().unwrap().flags.eak));

    conn.deliver(Instant::from_millis(40), data(1002, false, b"d2"));
    assert_eq!(conn.rcv_cur(), SeqNr::new(1004));
    assert!(conn.rx_queue_len() == 0);

    let mut delivered = Vec::new();
    while let Some(RecvItem::Data(packet)) = conn.recv() {
        delivered.push(packet.bytes().to_vec());
    }
    assert_eq!(
        delivered,
        vec![b"d1".to_vec(), b"d2".to_vec(), b"d3".to_vec(), b"d4".to_vec()]
    );
}

#[test]
fn retransmit_on_packet_timeout() {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut conn = open_passive_connection(1000, fabric.clone());
    fabric.drain();

    conn.send_segment(Instant::from_millis(0), b"payload").unwrap();
    assert!(fabric.drain().iter().any(|p| p.header().unwrap().seq_nr == SeqNr::new(PASSIVE_ISS + 1)));

    // packet_timeout_ms defaults to 1000; well before it, nothing resends.
    conn.tick(Instant::from_millis(500));
    assert!(fabric.drain().is_empty());

    conn.tick(Instant::from_millis(1000));
    let resent = fabric.drain();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].header().unwrap().seq_nr, SeqNr::new(PASSIVE_ISS + 1));

    // Immediately after a retransmit, the timestamp is refreshed, so a
    // second tick at the same instant does not resend again.
    conn.tick(Instant::from_millis(1000));
    assert!(fabric.drain().is_empty());

    conn.tick(Instant::from_millis(2000));
    assert_eq!(fabric.drain().len(), 1);
}

#[test]
fn reset_in_sequence_moves_to_close_wait_then_closed() {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut conn = open_passive_connection(1000, fabric.clone());
    assert_eq!(conn.rcv_cur(), SeqNr::new(1000));
    fabric.drain();

    conn.deliver(
        Instant::from_millis(0),
        inbound(
            1001,
            PASSIVE_ISS,
            Flags {
                rst: true,
                ..Default::default()
            },
            &[],
        ),
    );
    assert_eq!(conn.state(), State::CloseWait);
    let sent = fabric.drain();
    assert_eq!(sent.len(), 1);
    let repr = sent[0].header().unwrap();
    assert!(repr.flags.rst && repr.flags.ack);

    match conn.recv() {
        Some(RecvItem::Closed) => {}
        other => panic!("expected close notification, got {:?}", other),
    }

    // conn_timeout_ms defaults to 10_000.
    conn.tick(Instant::from_millis(5_000));
    assert_eq!(conn.state(), State::CloseWait);

    conn.tick(Instant::from_millis(10_001));
    assert_eq!(conn.state(), State::Closed);
}
