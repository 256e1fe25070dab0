use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Round `secs` down to a multiple of `snap_interval`.
///
/// Gives independently clocked nodes a shared join key.
pub fn align_timestamp(secs: i64, snap_interval: u64) -> i64 {
    let snap = snap_interval.max(1) as i64;
    secs.div_euclid(snap) * snap
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at_secs(secs: i64) -> Self {
        Self {
            millis: AtomicI64::new(secs * 1000),
        }
    }

    pub fn set_secs(&self, secs: i64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

/// Seconds between two instants as a float, negative if `to` precedes `from`.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_timestamp() {
        assert_eq!(align_timestamp(1005, 60), 960);
        assert_eq!(align_timestamp(1020, 60), 1020);
        assert_eq!(align_timestamp(1234, 1), 1234);
        assert_eq!(align_timestamp(1234, 0), 1234);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at_secs(1000);
        assert_eq!(clock.now().timestamp(), 1000);
        clock.advance_millis(5500);
        assert_eq!(clock.now().timestamp_millis(), 1_005_500);
        clock.set_secs(2000);
        assert_eq!(clock.now().timestamp(), 2000);
    }

    #[test]
    fn test_elapsed_secs() {
        let a = Utc.timestamp_opt(1000, 0).unwrap();
        let b = Utc.timestamp_millis_opt(1_005_250).unwrap();
        assert_eq!(elapsed_secs(a, b), 5.25);
    }
}
