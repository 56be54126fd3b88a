//! Wall-clock sources and hour alignment

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored at a fixed instant and advanced by tokio's clock.
///
/// Under a paused tokio runtime this follows virtual time, which keeps the
/// reported wall-clock instants consistent with the timer.
#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl InstantClock {
    /// Start at `base`; must be created inside a tokio runtime
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for InstantClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or(Duration::zero());
        self.base + elapsed
    }
}

/// The next wall-clock hour boundary in `timezone`, or `now` itself when it
/// is exactly on one
pub fn next_aligned(now: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&timezone);
    let into_hour = Duration::seconds(i64::from(local.minute()) * 60 + i64::from(local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));

    if into_hour.is_zero() {
        return now;
    }
    now - into_hour + Duration::hours(1)
}
