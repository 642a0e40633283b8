//! Monotonic millisecond time, kept deliberately narrow: a `u32` counter as
//! produced by the `now_ms()` primitive of the host environment.
//!
//! Known limitation (see design notes): arithmetic here is plain unsigned
//! comparison, not modular/wrapping distance. A connection that survives
//! past a `u32` millisecond wraparound (~49.7 days) will misbehave, exactly
//! as in the system this crate is modeled on.

use core::fmt;
use core::ops::{Add, Sub};

/// A point in time, in milliseconds since some unspecified epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Instant(u32);

impl Instant {
    pub const fn from_millis(millis: u32) -> Instant {
        Instant(millis)
    }

    pub const fn millis(&self) -> u32 {
        self.0
    }

    /// Saturating duration since an earlier instant. Returns `Duration(0)`
    /// if `self` is not actually later than `earlier` (can happen right at
    /// the millisecond wraparound boundary).
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0.wrapping_add(rhs.0))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0.wrapping_sub(rhs.0))
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

/// A span of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(u32);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_millis(millis: u32) -> Duration {
        Duration(millis)
    }

    pub const fn millis(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The clock capability the core is polymorphic over (`now_ms()` in the
/// spec). Production code wires in a real monotonic clock; tests wire in a
/// `VirtualClock` that only advances when told to.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// A `Clock` backed by `std::time::Instant`, for production use.
#[derive(Debug, Default)]
pub struct SystemClock {
    start: std::sync::OnceLock<std::time::Instant>,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock {
            start: std::sync::OnceLock::new(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let start = self.start.get_or_init(std::time::Instant::now);
        let elapsed = start.elapsed().as_millis();
        Instant::from_millis(elapsed as u32)
    }
}

/// A clock that only advances when explicitly told to, used by tests to
/// drive the timeout engine deterministically.
#[derive(Debug)]
pub struct VirtualClock {
    now: std::sync::Mutex<Instant>,
}

impl VirtualClock {
    pub fn new() -> VirtualClock {
        VirtualClock {
            now: std::sync::Mutex::new(Instant::default()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }

    pub fn set(&self, instant: Instant) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
