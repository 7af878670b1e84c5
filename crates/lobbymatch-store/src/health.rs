//! Store health tracking.
//!
//! A breaker over store availability. The first `StoreUnavailable` marks
//! the store as failing; once failures have persisted past the outage
//! ceiling the engine is degraded and refuses new submissions and
//! formation attempts. Any successful store call closes the breaker.
//!
//! ```text
//!   Healthy ──failure──▶ Failing ──(outage > ceiling)──▶ Degraded
//!      ▲                   │                                │
//!      └─────success───────┴───────────success──────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lobbymatch_types::{Clock, LobbymatchError, Result};

const HEALTHY: i64 = i64::MIN;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Failing {
        since: DateTime<Utc>,
        consecutive_failures: u64,
    },
    Degraded {
        outage_ms: u64,
        consecutive_failures: u64,
    },
}

/// Shared, lock-free store health breaker.
pub struct StoreHealth {
    clock: Arc<dyn Clock>,
    ceiling: Duration,
    failing_since_ms: AtomicI64,
    consecutive_failures: AtomicU64,
}

impl StoreHealth {
    pub fn new(clock: Arc<dyn Clock>, ceiling: Duration) -> Self {
        Self {
            clock,
            ceiling,
            failing_since_ms: AtomicI64::new(HEALTHY),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        let previous = self.failing_since_ms.swap(HEALTHY, Ordering::SeqCst);
        let failures = self.consecutive_failures.swap(0, Ordering::SeqCst);
        if previous != HEALTHY {
            tracing::info!(failures, "Shared state store recovered");
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now().timestamp_millis();
        let _ = self.failing_since_ms.compare_exchange(
            HEALTHY,
            now,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(failures, "Shared state store call failed");
    }

    /// Record the outcome of a store call: `StoreUnavailable` counts as a
    /// failure, anything else as proof the store answered.
    pub fn observe<T>(&self, outcome: &Result<T>) {
        match outcome {
            Err(LobbymatchError::StoreUnavailable { .. }) => self.record_failure(),
            _ => self.record_success(),
        }
    }

    /// How long the store has been failing, if it is.
    #[must_use]
    pub fn outage(&self) -> Option<Duration> {
        let since = self.failing_since_ms.load(Ordering::SeqCst);
        if since == HEALTHY {
            return None;
        }
        let elapsed = self.clock.now().timestamp_millis().saturating_sub(since);
        Some(Duration::from_millis(u64::try_from(elapsed).unwrap_or(0)))
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.outage().is_some_and(|outage| outage > self.ceiling)
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let consecutive_failures = self.consecutive_failures.load(Ordering::SeqCst);
        let since = self.failing_since_ms.load(Ordering::SeqCst);
        match self.outage() {
            None => HealthStatus::Healthy,
            Some(outage) if outage > self.ceiling => HealthStatus::Degraded {
                outage_ms: u64::try_from(outage.as_millis()).unwrap_or(u64::MAX),
                consecutive_failures,
            },
            Some(_) => HealthStatus::Failing {
                since: Utc
                    .timestamp_millis_opt(since)
                    .single()
                    .unwrap_or_default(),
                consecutive_failures,
            },
        }
    }

    /// `Err(EngineDegraded)` while degraded.
    pub fn ensure_available(&self) -> Result<()> {
        if let HealthStatus::Degraded { outage_ms, .. } = self.status() {
            return Err(LobbymatchError::EngineDegraded { outage_ms });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbymatch_types::ManualClock;

    fn health() -> (Arc<ManualClock>, StoreHealth) {
        let clock = Arc::new(ManualClock::fixed());
        let health = StoreHealth::new(clock.clone(), Duration::from_secs(30));
        (clock, health)
    }

    #[test]
    fn healthy_by_default() {
        let (_, health) = health();
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert!(health.ensure_available().is_ok());
    }

    #[test]
    fn degrades_after_ceiling() {
        let (clock, health) = health();
        health.record_failure();
        clock.advance(Duration::from_secs(10));
        health.record_failure();
        assert!(matches!(
            health.status(),
            HealthStatus::Failing {
                consecutive_failures: 2,
                ..
            }
        ));
        assert!(!health.is_degraded());

        clock.advance(Duration::from_secs(21));
        assert!(health.is_degraded());
        let err = health.ensure_available().unwrap_err();
        assert!(matches!(err, LobbymatchError::EngineDegraded { outage_ms: 31_000 }));
    }

    #[test]
    fn success_closes_breaker() {
        let (clock, health) = health();
        health.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(health.is_degraded());
        health.record_success();
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn observe_only_counts_store_outages() {
        let (_, health) = health();
        health.observe::<()>(&Err(LobbymatchError::invalid("bad")));
        assert_eq!(health.status(), HealthStatus::Healthy);
        health.observe::<()>(&Err(LobbymatchError::store_unavailable("down")));
        assert!(health.outage().is_some());
        health.observe(&Ok(()));
        assert!(health.outage().is_none());
    }
}
