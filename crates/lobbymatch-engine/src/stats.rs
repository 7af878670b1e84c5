//! Queue statistics.
//!
//! Counters are lock-free atomics bumped by formation and supervision.
//! Shard gauges (depth, oldest wait) are read from the pool at snapshot
//! time rather than tracked incrementally.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lobbymatch_ingress::ShardGauge;
use lobbymatch_store::HealthStatus;
use serde::Serialize;

/// Engine-wide counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    matches_formed: AtomicU64,
    tickets_matched: AtomicU64,
    claim_conflicts: AtomicU64,
    commit_failures: AtomicU64,
    expirations: AtomicU64,
    cancellations: AtomicU64,
    releases: AtomicU64,
    dead_letters: AtomicU64,
    dependency_errors: AtomicU64,
    time_to_match_ms_total: AtomicU64,
    time_to_match_samples: AtomicU64,
}

impl EngineStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A committed match, with the wait of each participating ticket.
    pub fn record_match(&self, waits_ms: &[u64]) {
        self.matches_formed.fetch_add(1, Ordering::Relaxed);
        self.tickets_matched
            .fetch_add(waits_ms.len() as u64, Ordering::Relaxed);
        let total = waits_ms.iter().fold(0u64, |acc, w| acc.saturating_add(*w));
        self.time_to_match_ms_total
            .fetch_add(total, Ordering::Relaxed);
        self.time_to_match_samples
            .fetch_add(waits_ms.len() as u64, Ordering::Relaxed);
    }

    pub fn record_claim_conflict(&self) {
        self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letters(&self, n: usize) {
        self.dead_letters.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_dependency_error(&self) {
        self.dependency_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters plus the supplied gauges.
    #[must_use]
    pub fn snapshot(
        &self,
        shards: Vec<ShardGauge>,
        health: HealthStatus,
        now: DateTime<Utc>,
    ) -> StatsSnapshot {
        let samples = self.time_to_match_samples.load(Ordering::Relaxed);
        let total = self.time_to_match_ms_total.load(Ordering::Relaxed);
        let shards = shards
            .into_iter()
            .map(|g| ShardStats {
                mode: g.shard.mode.to_string(),
                region: g.shard.region.to_string(),
                depth: g.depth,
                oldest_wait_ms: g
                    .oldest_submitted_at
                    .map(|at| (now - at).num_milliseconds().max(0)),
            })
            .collect();
        StatsSnapshot {
            taken_at: now,
            degraded: matches!(health, HealthStatus::Degraded { .. }),
            matches_formed: self.matches_formed.load(Ordering::Relaxed),
            tickets_matched: self.tickets_matched.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            dependency_errors: self.dependency_errors.load(Ordering::Relaxed),
            avg_time_to_match_ms: total.checked_div(samples),
            shards,
        }
    }
}

/// Gauges for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub mode: String,
    pub region: String,
    pub depth: usize,
    pub oldest_wait_ms: Option<i64>,
}

/// Serializable view of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub degraded: bool,
    pub matches_formed: u64,
    pub tickets_matched: u64,
    pub claim_conflicts: u64,
    pub commit_failures: u64,
    pub expirations: u64,
    pub cancellations: u64,
    pub releases: u64,
    pub dead_letters: u64,
    pub dependency_errors: u64,
    /// `None` until the first match.
    pub avg_time_to_match_ms: Option<u64>,
    pub shards: Vec<ShardStats>,
}

impl StatsSnapshot {
    /// Total `Pending` tickets across shards.
    #[must_use]
    pub fn total_depth(&self) -> usize {
        self.shards.iter().map(|s| s.depth).sum()
    }
}
