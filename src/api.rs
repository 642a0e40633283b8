//! The public entry points (§4.6): everything a caller does to this crate
//! goes through one of these functions, each of which acquires the global
//! [`RdpLock`](crate::sync::RdpLock), does its work, and releases it before
//! returning (or before blocking on a connection's `tx_wait`, per §5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use crate::env::{DatagramSink, Packet, PacketPool, UnboundedPool};
use crate::error::{Error, Result};
use crate::options::{Options, OptionsHandle};
use crate::socket::{AcceptQueue, ConnHandle, Connection, RecvItem, State};
use crate::sync::RdpLock;
use crate::time::Clock;

/// Everything shared across every connection this process manages: the
/// global lock, the negotiated-defaults handle, and the environment
/// capabilities new connections are allocated with.
///
/// The connection table itself (mapping addresses to [`ConnHandle`]s,
/// demultiplexing inbound datagrams) is explicitly out of scope (§2
/// Non-goals) — callers own that and pass the right `ConnHandle` to
/// [`deliver`] and [`tick`] themselves.
pub struct Runtime {
    pub lock: RdpLock,
    pub options: OptionsHandle,
    datagram: Arc<dyn DatagramSink>,
    pool: Arc<dyn PacketPool>,
    clock: Arc<dyn Clock>,
    next_conn_id: Mutex<u16>,
}

impl Runtime {
    pub fn new(datagram: Arc<dyn DatagramSink>, clock: Arc<dyn Clock>) -> Runtime {
        Runtime::with_pool(datagram, Arc::new(UnboundedPool), clock)
    }

    pub fn with_pool(
        datagram: Arc<dyn DatagramSink>,
        pool: Arc<dyn PacketPool>,
        clock: Arc<dyn Clock>,
    ) -> Runtime {
        Runtime {
            lock: RdpLock::new(),
            options: OptionsHandle::default(),
            datagram,
            pool,
            clock,
            next_conn_id: Mutex::new(1),
        }
    }

    fn fresh_conn_id(&self) -> u16 {
        let mut next = self.next_conn_id.lock().unwrap();
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }

    /// `allocate(conn)` (§4.6): build a new, `CLOSED` connection, its
    /// queues, and its wake signal, snapshotting the current process-wide
    /// defaults.
    pub fn allocate(&self) -> ConnHandle {
        let conn_id = self.fresh_conn_id();
        let options = self.options.snapshot();
        Arc::new(Mutex::new(Connection::allocate(
            conn_id,
            self.datagram.clone(),
            self.pool.clone(),
            options,
        )))
    }

    /// `allocate` for a passively-opened connection whose first successful
    /// in-order segment should be posted to `accept_queue` (§6).
    pub fn allocate_listener(&self, accept_queue: Arc<dyn AcceptQueue>) -> ConnHandle {
        let handle = self.allocate();
        handle.lock().unwrap().set_accept_queue(accept_queue);
        handle
    }

    /// `set_options(opts)` (§4.6, §9): publish new process-wide defaults.
    /// Connections already allocated keep the snapshot they took at
    /// `allocate` time.
    pub fn set_options(&self, options: Options) {
        self.options.publish(options);
    }

    /// `deliver(conn, packet)` (§4.6): route an inbound, already-demuxed
    /// datagram to `conn`.
    pub fn deliver(&self, conn: &ConnHandle, packet: Packet) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let now = self.clock.now();
        conn.lock().unwrap().deliver(now, packet);
        Ok(())
    }

    /// `tick(conn)` (§4.6, §4.5): run the timeout engine for `conn`. A
    /// caller is expected to invoke this periodically (e.g. every
    /// `packet_timeout_ms / 2`) for every live connection.
    pub fn tick(&self, conn: &ConnHandle) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let now = self.clock.now();
        conn.lock().unwrap().tick(now);
        Ok(())
    }

    /// `active_open(conn, timeout_ms)` (§4.4, §4.6): send the SYN, then
    /// wait for the handshake to complete or fail. On a half-open-detected
    /// RST (§4.6 half-open retry), retries the open exactly once before
    /// giving up with [`Error::ConnectTimeout`].
    pub fn active_open(&self, conn: &ConnHandle, timeout_ms: u32) -> Result<()> {
        for _attempt in 0..2 {
            let tx_wait = {
                let _guard = self.lock.acquire()?;
                let now = self.clock.now();
                let mut connection = conn.lock().unwrap();
                connection.begin_active_open(now);
                connection.tx_wait.clone()
            };

            let signaled = tx_wait.wait_timeout(StdDuration::from_millis(timeout_ms as u64));

            let _guard = self.lock.acquire()?;
            let connection = conn.lock().unwrap();
            match connection.state() {
                State::Open => return Ok(()),
                State::SynSent if signaled => {
                    // A half-open RST came in (deliver() signals tx_wait
                    // without changing state): retry the handshake once.
                    // Drop the guard before retrying.
                    drop(connection);
                    continue;
                }
                _ => {
                    // Either a genuine timeout (tx_wait never signaled) or
                    // some other terminal state: fail without retrying.
                    drop(connection);
                    break;
                }
            }
        }
        // The retry above also failed to reach OPEN, or there was nothing
        // to retry: give up and leave the connection in CLOSE_WAIT rather
        // than stuck in SYN_SENT forever.
        let _guard = self.lock.acquire()?;
        let now = self.clock.now();
        conn.lock().unwrap().close(now);
        Err(Error::ConnectTimeout)
    }

    /// `send(conn, packet, timeout_ms)` (§4.6, §5): block (releasing the
    /// lock while waiting) until the send window has room, then transmit.
    pub fn send(&self, conn: &ConnHandle, payload: &[u8], timeout_ms: u32) -> Result<()> {
        let deadline = self.clock.now() + crate::time::Duration::from_millis(timeout_ms);
        loop {
            let tx_wait = {
                let _guard = self.lock.acquire()?;
                let mut connection = conn.lock().unwrap();
                if connection.state() != State::Open {
                    return Err(Error::StateViolation);
                }
                if !connection.window_full() {
                    let now = self.clock.now();
                    connection.send_segment(now, payload)?;
                    return Ok(());
                }
                connection.tx_wait.clone()
            };

            let now = self.clock.now();
            if now >= deadline {
                return Err(Error::SendTimeout);
            }
            let remaining = deadline.saturating_duration_since(now);
            if !tx_wait.wait_timeout(StdDuration::from_millis(remaining.millis() as u64)) {
                return Err(Error::SendTimeout);
            }
        }
    }

    /// `close(conn)` (§4.4, §4.6): user-initiated close.
    pub fn close(&self, conn: &ConnHandle) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let now = self.clock.now();
        conn.lock().unwrap().close(now);
        Ok(())
    }

    /// Drain one item (payload or close notification) from `conn`'s
    /// application receive queue, if any is waiting.
    pub fn recv(&self, conn: &ConnHandle) -> Result<Option<RecvItem>> {
        let _guard = self.lock.acquire()?;
        Ok(conn.lock().unwrap().recv())
    }

    /// `flush_all(conn)` (§4.6): free a connection's queues, e.g. once its
    /// terminal `CLOSED` state has been observed and it is being recycled.
    pub fn flush_all(&self, conn: &ConnHandle) -> Result<()> {
        let _guard = self.lock.acquire()?;
        conn.lock().unwrap().flush_all();
        Ok(())
    }
}

/// A minimal connection table: address (or any caller-chosen key) to
/// [`ConnHandle`], for callers who don't already have their own (§2
/// Non-goals: the crate itself does not require one).
#[derive(Default)]
pub struct ConnectionTable<K: std::hash::Hash + Eq> {
    entries: Mutex<HashMap<K, ConnHandle>>,
}

impl<K: std::hash::Hash + Eq + Clone> ConnectionTable<K> {
    pub fn new() -> ConnectionTable<K> {
        ConnectionTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: K, handle: ConnHandle) {
        self.entries.lock().unwrap().insert(key, handle);
    }

    pub fn get(&self, key: &K) -> Option<ConnHandle> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<ConnHandle> {
        self.entries.lock().unwrap().remove(key)
    }

    /// Every handle currently in the table, for a caller driving `tick`
    /// across all live connections.
    pub fn handles(&self) -> Vec<ConnHandle> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}
