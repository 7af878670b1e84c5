//! Time source abstraction.
//!
//! Every age computation (search window, expiry, orphaned claims, store
//! TTLs) reads the time through a [`Clock`] so tests can drive it by hand.

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use super::Clock;

    /// A clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Start at the given instant.
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Start at a fixed, arbitrary instant.
        pub fn fixed() -> Self {
            Self::new(Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap_or_default())
        }

        pub fn advance(&self, by: std::time::Duration) {
            let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
            self.millis.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn advance_ms(&self, ms: i64) {
            self.millis.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn set(&self, at: DateTime<Utc>) {
            self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
                .single()
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::fixed();
        let start = clock.now();
        clock.advance(std::time::Duration::from_millis(1500));
        assert_eq!((clock.now() - start).num_milliseconds(), 1500);
        clock.advance_ms(500);
        assert_eq!((clock.now() - start).num_milliseconds(), 2000);
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn system_clock_moves_forward() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
