//! Negotiated connection parameters (§3, §6) and the module-wide defaults
//! `set_options` publishes (§4.6, §9).
//!
//! The spec's "global mutable options" are redesigned here per §9: instead
//! of plain static mutables, defaults live behind an `OptionsHandle` that
//! publishes a fresh immutable `Arc<Options>` on `set_options`. A connection
//! reads the handle exactly once, at `allocate`/handshake time, and keeps
//! that snapshot for its whole lifetime — later `set_options` calls never
//! perturb connections already in flight.

use std::sync::{Arc, Mutex};

/// Negotiated parameters for one connection, or the process-wide defaults
/// an active opener proposes and a passive opener must adopt verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub window_size: u16,
    pub conn_timeout_ms: u32,
    pub packet_timeout_ms: u32,
    pub delayed_acks: bool,
    pub ack_timeout_ms: u32,
    pub ack_delay_count: u16,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            window_size: 10,
            conn_timeout_ms: 10_000,
            packet_timeout_ms: 1_000,
            delayed_acks: true,
            ack_timeout_ms: 500,
            ack_delay_count: 5,
        }
    }
}

impl Options {
    /// Decode the SYN parameter block (§3, §6).
    pub fn from_syn_payload(bytes: &[u8; crate::wire::SYN_PAYLOAD_LEN]) -> Options {
        let words = crate::wire::syn::read_words(bytes);
        Options {
            window_size: words[0] as u16,
            conn_timeout_ms: words[1],
            packet_timeout_ms: words[2],
            delayed_acks: words[3] != 0,
            ack_timeout_ms: words[4],
            ack_delay_count: words[5] as u16,
        }
    }

    /// Encode as a SYN parameter block.
    pub fn to_syn_payload(&self) -> [u8; crate::wire::SYN_PAYLOAD_LEN] {
        crate::wire::syn::write_words([
            self.window_size as u32,
            self.conn_timeout_ms,
            self.packet_timeout_ms,
            self.delayed_acks as u32,
            self.ack_timeout_ms,
            self.ack_delay_count as u32,
        ])
    }

    pub fn conn_timeout(&self) -> crate::time::Duration {
        crate::time::Duration::from_millis(self.conn_timeout_ms)
    }

    pub fn packet_timeout(&self) -> crate::time::Duration {
        crate::time::Duration::from_millis(self.packet_timeout_ms)
    }

    pub fn ack_timeout(&self) -> crate::time::Duration {
        crate::time::Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Holds the process-wide default `Options`, published atomically.
#[derive(Debug)]
pub struct OptionsHandle {
    current: Mutex<Arc<Options>>,
}

impl OptionsHandle {
    pub fn new(defaults: Options) -> OptionsHandle {
        OptionsHandle {
            current: Mutex::new(Arc::new(defaults)),
        }
    }

    /// Snapshot the current defaults. Connections call this once, at
    /// `allocate` time, and keep the result for their whole lifetime.
    pub fn snapshot(&self) -> Arc<Options> {
        self.current.lock().unwrap().clone()
    }

    /// Publish new defaults (`set_options`, §4.6). Connections that already
    /// hold a snapshot are unaffected.
    pub fn publish(&self, options: Options) {
        *self.current.lock().unwrap() = Arc::new(options);
    }
}

impl Default for OptionsHandle {
    fn default() -> Self {
        OptionsHandle::new(Options::default())
    }
}
