//! Wall-clock access for scheduling decisions.
//!
//! Schedule windows are expressed as local time-of-day, so every scheduling
//! decision reads a `chrono` local timestamp through a [`Clock`]. Elapsed
//! execution time is measured separately with `std::time::Instant`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, TimeDelta, Timelike};
use parking_lot::Mutex;

/// Upper bound applied to offsets added to a timestamp (100 years).
const MAX_OFFSET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Source of "now" for the supervisor.
pub trait Clock: Send + Sync + 'static {
    /// Current local wall-clock time.
    fn now(&self) -> DateTime<Local>;
}

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock for simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Offset of `at` from local midnight.
#[must_use]
pub fn time_of_day(at: &DateTime<Local>) -> Duration {
    // Leap seconds are reported as nanosecond values >= 1e9.
    Duration::new(
        u64::from(at.num_seconds_from_midnight()),
        at.nanosecond() % 1_000_000_000,
    )
}

/// `at + by`, saturating instead of overflowing.
#[must_use]
pub fn add_duration(at: DateTime<Local>, by: Duration) -> DateTime<Local> {
    TimeDelta::from_std(by.min(MAX_OFFSET))
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

/// `later - earlier`, clamped at zero.
#[must_use]
pub fn elapsed_between(later: DateTime<Local>, earlier: DateTime<Local>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}
