//! Time Sources
//!
//! Every time-dependent decision in the core (report expiry, idle dwell,
//! frame deltas) reads the current instant through a [`Clock`]. Production
//! code uses [`SystemClock`]; tests drive a [`ManualClock`] forward so that
//! expiry and idle cycling can be asserted at exact instants.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic time
pub trait Clock: Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;
}

/// Shared clock handle passed to every component that needs time
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`Instant::now`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl SystemClock {
    /// Shared handle to the system clock
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

/// Manually advanced clock
///
/// Clones share the same elapsed offset, so a test can hand one clone to the
/// driver and keep another to move time forward.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at its origin
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// The instant corresponding to t=0
    #[must_use]
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Time elapsed since the origin
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) {
        *self.elapsed.lock() += delta;
    }

    /// Move time forward by `secs` seconds
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }

    /// Jump to an absolute offset from the origin
    ///
    /// Offsets earlier than the current one are ignored; the clock never
    /// runs backwards.
    pub fn set_elapsed_secs(&self, secs: f64) {
        let target = Duration::from_secs_f64(secs);
        let mut elapsed = self.elapsed.lock();
        if target > *elapsed {
            *elapsed = target;
        }
    }

    /// Shared handle to this clock
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }
}
