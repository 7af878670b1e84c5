//! Match formation: one pass over one shard.
//!
//! ## Tick
//!
//! ```text
//! pool scan (candidates) → form_groups (deterministic) → for each group:
//!     claim_all ──Conflict──▶ refresh candidates, retry next tick
//!         │
//!      Claimed ──▶ commit_match ──false──▶ release claims, requeue
//!                       │ └──Err──▶ left for the supervisor
//!                     true ──▶ MatchFormed event, mark announced, retention TTLs
//! ```
//!
//! The atomic multi-claim is the only authority for taking a ticket. Pool
//! scans may be stale and may race with other workers; a lost race costs
//! one tick, never a double allocation. Once a commit succeeds the match
//! stands, whatever happens to its announcement.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lobbymatch_delivery::EventSink;
use lobbymatch_ingress::PoolManager;
use lobbymatch_matchcore::{ProposedGroup, form_groups, pass_digest_hex};
use lobbymatch_store::{ClaimOutcome, StoreHealth, StoredTicket, TicketRepository};
use lobbymatch_types::{
    Clock, Match, MatchmakingConfig, MatchmakingEvent, Result, ShardKey, Ticket,
};

use crate::stats::EngineStats;

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The store has been unreachable past the outage ceiling.
    Degraded,
    /// The shard's previous tick is still running.
    Overlapping,
    /// No mode is configured for the shard.
    UnknownMode,
}

/// Outcome of one formation tick on one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub shard: ShardKey,
    pub candidates: usize,
    pub proposed: usize,
    pub formed: Vec<Match>,
    pub conflicts: usize,
    pub commit_failures: usize,
    pub skipped: Option<SkipReason>,
}

impl TickReport {
    fn new(shard: &ShardKey) -> Self {
        Self {
            shard: shard.clone(),
            candidates: 0,
            proposed: 0,
            formed: Vec::new(),
            conflicts: 0,
            commit_failures: 0,
            skipped: None,
        }
    }

    fn skipped(shard: &ShardKey, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(shard)
        }
    }
}

/// Marks a shard as mid-tick until dropped.
struct InFlight<'a> {
    shards: &'a Mutex<HashSet<ShardKey>>,
    shard: ShardKey,
}

impl<'a> InFlight<'a> {
    fn enter(shards: &'a Mutex<HashSet<ShardKey>>, shard: &ShardKey) -> Option<Self> {
        let mut active = shards.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(shard.clone()).then(|| Self {
            shards,
            shard: shard.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.shard);
    }
}

/// Scans shards, groups candidates, and turns groups into committed matches.
pub struct MatchFormationEngine {
    config: Arc<MatchmakingConfig>,
    repo: TicketRepository,
    pool: Arc<PoolManager>,
    events: Arc<dyn EventSink>,
    health: Arc<StoreHealth>,
    stats: Arc<EngineStats>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<ShardKey>>,
}

impl MatchFormationEngine {
    pub fn new(
        config: Arc<MatchmakingConfig>,
        repo: TicketRepository,
        pool: Arc<PoolManager>,
        events: Arc<dyn EventSink>,
        health: Arc<StoreHealth>,
        stats: Arc<EngineStats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            repo,
            pool,
            events,
            health,
            stats,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn observed<T>(&self, outcome: Result<T>) -> Result<T> {
        self.health.observe(&outcome);
        if outcome.is_err() {
            self.stats.record_dependency_error();
        }
        outcome
    }

    /// Run one formation pass over `shard`.
    ///
    /// Returns `Err(StoreUnavailable)` if the store failed mid-pass. Claims
    /// whose commit outcome is unknown are left for the supervisor, which
    /// settles them against the match record or releases them after the
    /// grace period.
    pub async fn tick(&self, shard: &ShardKey) -> Result<TickReport> {
        if self.health.is_degraded() {
            tracing::warn!(shard = %shard, "Store degraded; skipping formation tick");
            return Ok(TickReport::skipped(shard, SkipReason::Degraded));
        }
        let Some(_guard) = InFlight::enter(&self.in_flight, shard) else {
            tracing::debug!(shard = %shard, "Previous tick still running; skipping");
            return Ok(TickReport::skipped(shard, SkipReason::Overlapping));
        };
        let Some(mode) = self.config.mode(&shard.mode) else {
            tracing::warn!(shard = %shard, "No mode configured for shard");
            return Ok(TickReport::skipped(shard, SkipReason::UnknownMode));
        };

        let now = self.clock.now();
        let scan = self.pool.scan(shard, Ticket::is_pending).await;
        let candidates = scan.to_vec();
        let groups = form_groups(
            &candidates,
            mode.participants,
            self.config.window_for(&shard.mode),
            now,
        );

        let mut report = TickReport::new(shard);
        report.candidates = candidates.len();
        report.proposed = groups.len();
        if groups.is_empty() {
            return Ok(report);
        }
        tracing::debug!(
            shard = %shard,
            candidates = candidates.len(),
            groups = groups.len(),
            generation = scan.generation(),
            digest = %pass_digest_hex(shard, &groups),
            "Grouping pass complete"
        );

        for group in groups {
            self.attempt(shard, &group, now, &mut report).await?;
        }
        Ok(report)
    }

    async fn attempt(
        &self,
        shard: &ShardKey,
        group: &ProposedGroup,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let outcome = self.observed(self.repo.claim_all(&group.tickets, now).await)?;
        let claimed = match outcome {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::Conflict => {
                tracing::debug!(
                    shard = %shard,
                    tickets = group.tickets.len(),
                    "Claim conflict; deferring group to next tick"
                );
                self.stats.record_claim_conflict();
                report.conflicts += 1;
                self.refresh_candidates(&group.tickets).await;
                return Ok(());
            }
        };

        self.pool.remove_all(&group.ticket_ids()).await;
        let tickets: Vec<Ticket> = claimed.iter().map(|s| s.ticket.clone()).collect();
        let formed = Match::from_tickets(shard.clone(), &tickets, now);

        match self.observed(self.repo.commit_match(&formed, &claimed, now).await) {
            Ok(true) => {
                self.finalize(&formed, &tickets, now).await;
                report.formed.push(formed);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(
                    shard = %shard,
                    match_id = %formed.id,
                    "Match commit rejected; releasing claims"
                );
                self.stats.record_commit_failure();
                report.commit_failures += 1;
                self.dissolve(&claimed, now).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    shard = %shard,
                    match_id = %formed.id,
                    error = %e,
                    "Match commit outcome unknown; claims left for the supervisor"
                );
                Err(e)
            }
        }
    }

    async fn finalize(&self, formed: &Match, tickets: &[Ticket], now: DateTime<Utc>) {
        let waits: Vec<u64> = tickets
            .iter()
            .map(|t| u64::try_from(t.age(now).num_milliseconds()).unwrap_or(0))
            .collect();
        self.stats.record_match(&waits);
        tracing::info!(
            shard = %formed.shard,
            match_id = %formed.id,
            tickets = formed.ticket_ids.len(),
            participants = formed.participants,
            skill_spread = %formed.skill_spread,
            "Match formed"
        );

        if let Err(e) = self.events.emit(MatchmakingEvent::MatchFormed(formed.clone())).await {
            tracing::error!(match_id = %formed.id, error = %e, "Failed to emit MatchFormed");
            return;
        }
        // An unmarked match is announced again by the supervisor.
        match self.observed(self.repo.mark_announced(formed).await) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(match_id = %formed.id, "Match already marked announced");
            }
            Err(e) => {
                tracing::warn!(match_id = %formed.id, error = %e, "Failed to mark match announced");
            }
        }

        let ttl = self.config.terminal_retention();
        for ticket in tickets {
            let outcome = self.repo.retain_ticket(&ticket.id, ttl).await;
            if let Err(e) = self.observed(outcome) {
                tracing::warn!(ticket = %ticket.id, error = %e, "Failed to set retention on matched ticket");
            }
        }
        let outcome = self.repo.retain_match(&formed.id, ttl).await;
        if let Err(e) = self.observed(outcome) {
            tracing::warn!(match_id = %formed.id, error = %e, "Failed to set retention on match");
        }
    }

    /// Undo a claim whose commit was rejected.
    async fn dissolve(&self, claimed: &[StoredTicket], now: DateTime<Utc>) {
        for stored in claimed {
            match self.observed(self.repo.release(stored, now).await) {
                Ok(Some(released)) => {
                    self.stats.record_release();
                    if let Err(e) = self.pool.enqueue(released.ticket).await {
                        tracing::error!(ticket = %stored.ticket.id, error = %e, "Failed to requeue released ticket");
                    }
                }
                Ok(None) => {
                    tracing::debug!(ticket = %stored.ticket.id, "Claim already changed; nothing to release");
                }
                Err(e) => {
                    tracing::warn!(ticket = %stored.ticket.id, error = %e, "Release failed; supervisor will retry");
                }
            }
        }
    }

    /// Drop pool entries the store no longer holds as `Pending`.
    async fn refresh_candidates(&self, tickets: &[Ticket]) {
        for ticket in tickets {
            match self.observed(self.repo.load(&ticket.id).await) {
                Ok(Some(stored)) if stored.ticket.is_pending() => {}
                Ok(_) => {
                    self.pool.remove(&ticket.id).await;
                }
                Err(e) => {
                    tracing::debug!(ticket = %ticket.id, error = %e, "Candidate refresh interrupted");
                    return;
                }
            }
        }
    }
}
