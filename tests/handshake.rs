//! End-to-end scenarios driving two independent [`Runtime`]s connected by
//! in-memory [`LoopbackFabric`]s, exercising the public API the way a real
//! caller would: a background thread pumps datagrams between the two
//! sides while the foreground thread calls the blocking `active_open` and
//! `send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use rdp_core::api::Runtime;
use rdp_core::env::{DatagramSink, LoopbackFabric};
use rdp_core::socket::{RecvItem, State};
use rdp_core::time::VirtualClock;

struct Network {
    fabric_a: Arc<LoopbackFabric>,
    fabric_b: Arc<LoopbackFabric>,
    runtime_a: Arc<Runtime>,
    runtime_b: Arc<Runtime>,
    conn_a: rdp_core::ConnHandle,
    conn_b: rdp_core::ConnHandle,
}

/// Spawn a background thread that relays every datagram `a` sends to `b`
/// and vice versa, until `stop` is set. Returns the join handle.
fn spawn_pump(net: &Network, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let fabric_a = net.fabric_a.clone();
    let fabric_b = net.fabric_b.clone();
    let runtime_a = net.runtime_a.clone();
    let runtime_b = net.runtime_b.clone();
    let conn_a = net.conn_a.clone();
    let conn_b = net.conn_b.clone();
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            for packet in fabric_a.drain() {
                runtime_b.deliver(&conn_b, packet).unwrap();
            }
            for packet in fabric_b.drain() {
                runtime_a.deliver(&conn_a, packet).unwrap();
            }
            thread::sleep(StdDuration::from_millis(2));
        }
    })
}

fn new_network() -> Network {
    let clock = Arc::new(VirtualClock::new());
    let fabric_a = Arc::new(LoopbackFabric::new());
    let fabric_b = Arc::new(LoopbackFabric::new());
    let runtime_a = Arc::new(Runtime::new(fabric_a.clone(), clock.clone()));
    let runtime_b = Arc::new(Runtime::new(fabric_b.clone(), clock));
    let conn_a = runtime_a.allocate();
    let conn_b = runtime_b.allocate();
    Network {
        fabric_a,
        fabric_b,
        runtime_a,
        runtime_b,
        conn_a,
        conn_b,
    }
}

#[test]
fn happy_handshake_and_single_segment() {
    let net = new_network();
    let stop = Arc::new(AtomicBool::new(false));
    let pump = spawn_pump(&net, stop.clone());

    net.runtime_a.active_open(&net.conn_a, 2000).unwrap();
    assert_eq!(net.conn_a.lock().unwrap().state(), State::Open);
    // snd_una advances exactly once during the handshake, to snd_iss + 1;
    // read it now, before the data segment's own ACK can race with this
    // check and advance it again.
    let expected_seq = net.conn_a.lock().unwrap().snd_una();

    net.runtime_a.send(&net.conn_a, b"HELLO", 1000).unwrap();

    let mut received = None;
    for _ in 0..200 {
        if let Some(item) = net.runtime_b.recv(&net.conn_b).unwrap() {
            received = Some(item);
            break;
        }
        thread::sleep(StdDuration::from_millis(5));
    }
    match received.expect("HELLO was never delivered") {
        RecvItem::Data(packet) => assert_eq!(packet.bytes(), b"HELLO"),
        RecvItem::Closed => panic!("connection closed instead of delivering data"),
    }

    assert_eq!(net.conn_b.lock().unwrap().rcv_cur(), expected_seq);

    stop.store(true, Ordering::Relaxed);
    pump.join().unwrap();
}

#[test]
fn window_block_and_release() {
    let net = new_network();
    // Disable delayed ACKs: this test drives a VirtualClock that is never
    // advanced, so a delayed-ACK timeout would never fire and the blocked
    // third `send` would never be woken.
    net.runtime_a.set_options(rdp_core::Options {
        window_size: 2,
        delayed_acks: false,
        ..Default::default()
    });
    net.runtime_b.set_options(rdp_core::Options {
        window_size: 2,
        delayed_acks: false,
        ..Default::default()
    });
    // Connections already allocated above took the *old* defaults
    // snapshot, so re-allocate with the new window in effect.
    let conn_a = net.runtime_a.allocate();
    let conn_b = net.runtime_b.allocate();

    let stop = Arc::new(AtomicBool::new(false));
    let net2 = Network {
        fabric_a: net.fabric_a.clone(),
        fabric_b: net.fabric_b.clone(),
        runtime_a: net.runtime_a.clone(),
        runtime_b: net.runtime_b.clone(),
        conn_a: conn_a.clone(),
        conn_b: conn_b.clone(),
    };
    let pump = spawn_pump(&net2, stop.clone());

    net.runtime_a.active_open(&conn_a, 2000).unwrap();
    let starting_una = conn_a.lock().unwrap().snd_una();

    net.runtime_a.send(&conn_a, b"one", 1000).unwrap();

    // `snd_nxt - snd_una + 1 >= window_size` is already true after one
    // unacknowledged segment with window_size=2, so the second `send`
    // blocks until the peer ACKs the first and `tick` wakes the sender.
    let runtime_a = net.runtime_a.clone();
    let conn_a_for_send = conn_a.clone();
    let sender = thread::spawn(move || {
        runtime_a.send(&conn_a_for_send, b"two", 2000).unwrap();
    });

    for _ in 0..100 {
        net.runtime_a.tick(&conn_a).unwrap();
        net.runtime_b.tick(&conn_b).unwrap();
        thread::sleep(StdDuration::from_millis(5));
    }

    sender.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    pump.join().unwrap();

    // Both segments were accepted and acknowledged: snd_una advanced past
    // both "one" and "two".
    assert_eq!(conn_a.lock().unwrap().snd_una(), starting_una.wrapping_add(2));
}

#[test]
fn half_open_detected_on_active_open_retries_then_fails() {
    let net = new_network();
    // The peer never answers the SYN (e.g. it believes the connection is
    // already open) and instead always replies with a bare ACK — emulated
    // here by a pump that, instead of running the passive state machine,
    // answers every inbound SYN with a bare ACK directly.
    let fabric_a = net.fabric_a.clone();
    let fabric_b = net.fabric_b.clone();
    let runtime_a = net.runtime_a.clone();
    let conn_a = net.conn_a.clone();
    let conn_b = net.conn_b.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_pump = stop.clone();
    let pump = thread::spawn(move || {
        while !stop_pump.load(Ordering::Relaxed) {
            for packet in fabric_a.drain() {
                let repr = packet.header().unwrap();
                if repr.flags.syn {
                    let conn_id = conn_a.lock().unwrap().conn_id();
                    let mut ack = rdp_core::env::Packet::with_payload(conn_id, &[]);
                    ack.push_header(rdp_core::wire::Repr {
                        flags: rdp_core::wire::Flags {
                            ack: true,
                            ..Default::default()
                        },
                        seq_nr: rdp_core::wire::SeqNr::new(9000),
                        ack_nr: rdp_core::wire::SeqNr::new(0),
                    });
                    fabric_b.send_datagram(&ack);
                }
            }
            for packet in fabric_b.drain() {
                runtime_a.deliver(&conn_a, packet).unwrap();
            }
            thread::sleep(StdDuration::from_millis(2));
        }
        let _ = conn_b;
    });

    let result = net.runtime_a.active_open(&net.conn_a, 200);
    assert!(result.is_err());
    assert_eq!(net.conn_a.lock().unwrap().state(), State::CloseWait);

    stop.store(true, Ordering::Relaxed);
    pump.join().unwrap();
}
