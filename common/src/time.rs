//! Time utilities and constants for the Kantor engine.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;

/// Engine timing constants.
pub mod constants {
    use super::Duration;

    /// Bounded wait for a wallet lock (5 seconds).
    pub fn lock_acquisition_timeout() -> Duration {
        Duration::seconds(5)
    }

    /// Interval between scheduled rate syncs (1 hour).
    pub fn rate_sync_interval() -> Duration {
        Duration::hours(1)
    }

    /// How long a fallback quote is served before the feed is retried (60 seconds).
    pub fn fallback_quote_ttl() -> Duration {
        Duration::seconds(60)
    }

    /// Timeout for a single rate feed request (10 seconds).
    pub fn feed_request_timeout() -> Duration {
        Duration::seconds(10)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Source of "now" for date-sensitive logic.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Timestamp;

    /// Current calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<RwLock<Timestamp>>,
}

impl FixedClock {
    /// Create a clock frozen at the given instant.
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Create a clock frozen at noon UTC on the given date.
    pub fn on_date(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .unwrap_or_default()
            .and_utc();
        Self::at(noon)
    }

    /// Move the clock to a new instant.
    pub fn set(&self, now: Timestamp) {
        *self.now.write() = now;
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.read()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advances_across_days() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let clock = FixedClock::on_date(date);
        assert_eq!(clock.today(), date);

        clock.advance(Duration::hours(13));
        assert_eq!(clock.today(), date.succ_opt().unwrap());
    }

    #[test]
    fn test_negative_duration_as_std_is_zero() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            constants::lock_acquisition_timeout().as_std(),
            std::time::Duration::from_secs(5)
        );
    }
}
