//! The global lock and per-connection wake signal (§5).
//!
//! The spec is explicit that a *single* binary semaphore serializes all
//! RDP work, connection table and queues included, and that this is a
//! deliberate simplification, not an oversight — so unlike the teacher's
//! per-socket locking, this crate implements exactly the coarse lock the
//! spec calls for (§9 "coarse global lock" design note records why it is
//! kept rather than redesigned away).

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use crate::error::Error;

/// The single binary semaphore serializing all RDP work (`rdp_lock`, §5).
/// Acquisition carries a hard 1 second budget; a timeout is reported as a
/// deadlock, never silently retried.
#[derive(Debug, Default)]
pub struct RdpLock {
    inner: Mutex<()>,
}

/// Held while the caller has exclusive access to RDP state. Dropping it
/// releases the lock.
pub struct RdpLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl RdpLock {
    pub fn new() -> RdpLock {
        RdpLock {
            inner: Mutex::new(()),
        }
    }

    /// Acquire the lock, budgeted at 1000 ms (§5). `std::sync::Mutex` has
    /// no native timed lock, so the budget is approximated with a short
    /// polling backoff; under the non-contended, task-context usage the
    /// spec assumes, this resolves on the first attempt.
    pub fn acquire(&self) -> Result<RdpLockGuard<'_>, Error> {
        self.acquire_timeout(StdDuration::from_millis(1000))
    }

    pub fn acquire_timeout(&self, budget: StdDuration) -> Result<RdpLockGuard<'_>, Error> {
        let deadline = std::time::Instant::now() + budget;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(RdpLockGuard { _guard: guard }),
                Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                    return Ok(RdpLockGuard {
                        _guard: poisoned.into_inner(),
                    })
                }
                Err(std::sync::TryLockError::WouldBlock) => {
                    if std::time::Instant::now() >= deadline {
                        log::error!("RDP lock: deadlock (1000ms budget exceeded)");
                        return Err(Error::LockDeadlock);
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// A binary signal a sender or connector blocks on (`tx_wait`, §3/§5):
/// window space appearing, a handshake completing, or a forced wakeup on
/// close. Modeled as a boolean flag plus condvar rather than a raw
/// semaphore, since `deliver`/`tick` only ever need to post it and waiters
/// only ever need to wait-with-timeout on it.
#[derive(Debug, Default)]
pub struct TxWait {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl TxWait {
    pub fn new() -> TxWait {
        TxWait {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Post the signal, waking any waiter.
    pub fn signal(&self) {
        let mut posted = self.state.lock().unwrap();
        *posted = true;
        self.condvar.notify_all();
    }

    /// Wait for the signal, up to `timeout`. Returns `true` if it was
    /// posted, `false` on timeout. Consumes the signal on return.
    pub fn wait_timeout(&self, timeout: StdDuration) -> bool {
        let mut posted = self.state.lock().unwrap();
        if *posted {
            *posted = false;
            return true;
        }
        let (mut posted, result) = self
            .condvar
            .wait_timeout_while(posted, timeout, |posted| !*posted)
            .unwrap();
        let was_posted = !result.timed_out();
        if was_posted {
            *posted = false;
        }
        was_posted
    }
}
