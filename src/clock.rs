//! Clock seam for the upgrade control loop.
//!
//! The orchestrator never sleeps; it polls elapsed time against configured
//! budgets on every tick. Injecting a manual clock makes those transitions
//! deterministic in tests.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic instant used for elapsed-time budgets.
    fn now(&self) -> Instant;

    /// Wall-clock time used for event timestamps.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
pub struct ManualClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock anchored at the current real time.
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc: Utc::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap();
        *elapsed += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + *self.elapsed.lock().unwrap()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.base_utc + chrono::Duration::from_std(*self.elapsed.lock().unwrap()).unwrap_or_default()
    }
}
