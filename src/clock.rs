use chrono::{DateTime, Utc};
#[cfg(test)]
use chrono::Duration;
#[cfg(test)]
use parking_lot::Mutex;

/// Timestamp format used for every persisted timestamp. Fixed-width, so
/// lexicographic comparison of stored strings matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Time source for every time-dependent component.
///
/// Production code uses [`SystemClock`]; tests inject [`ManualClock`] so
/// TTL expiry and retention windows are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as fractional Unix seconds.
    fn epoch(&self) -> f64 {
        self.now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at a fixed epoch-second offset.
    pub fn at_epoch(secs: f64) -> Self {
        let micros = (secs * 1_000_000.0) as i64;
        Self::new(DateTime::from_timestamp_micros(micros).unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Advance the clock by fractional seconds.
    pub fn advance_secs(&self, secs: f64) {
        let mut now = self.now.lock();
        *now = *now + Duration::microseconds((secs * 1_000_000.0) as i64);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch(1_000.0);
        assert_eq!(clock.epoch(), 1000.0);
        clock.advance_secs(1.5);
        assert_eq!(clock.epoch(), 1001.5);
    }

    #[test]
    fn test_system_clock_is_reasonable() {
        let clock = SystemClock;
        // After 2020-01-01, before 2100-01-01.
        assert!(clock.epoch() > 1_577_836_800.0);
        assert!(clock.epoch() < 4_102_444_800.0);
    }

    #[test]
    fn test_format_is_lexicographically_ordered() {
        let clock = ManualClock::at_epoch(1_700_000_000.0);
        let early = format_ts(clock.now());
        clock.advance_secs(0.000_1);
        let late = format_ts(clock.now());
        assert!(early < late);
    }
}
