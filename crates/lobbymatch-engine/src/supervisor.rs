//! Timeout & requeue supervision.
//!
//! Runs on its own tick, independent of formation. Each pass:
//!
//! 1. drives the publisher outbox (retries due events, dead-letters spent ones)
//! 2. reads the store's ticket snapshot
//! 3. expires `Pending` tickets past the maximum wait
//! 4. resolves `Claimed` tickets whose claim outlived the grace period:
//!    a claim whose match record exists is finished as `Matched`, any other
//!    is released (a formation worker crashed between claim and commit)
//! 5. announces matches still `FORMED` past the grace period (a commit
//!    whose reply was lost, or a worker that died before announcing)
//! 6. realigns the pool with the store's `Pending` set
//!
//! A successful snapshot read is also what closes the store health breaker
//! after an outage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lobbymatch_delivery::{EventPublisher, RetryReport};
use lobbymatch_ingress::{PoolManager, ReconcileReport};
use lobbymatch_store::{StoreHealth, StoredTicket, TicketRepository};
use lobbymatch_types::{
    Clock, Match, MatchmakingConfig, MatchmakingEvent, Result, Ticket, TicketState,
};

use crate::stats::EngineStats;

/// Outcome of one supervisor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub expired: usize,
    pub released: usize,
    /// Orphaned claims finished against their committed match.
    pub settled: usize,
    /// Matches announced on behalf of a formation worker.
    pub announced: usize,
    pub reconcile: ReconcileReport,
    pub publish: RetryReport,
    /// Set when the store snapshot could not be read.
    pub store_error: Option<String>,
}

/// What became of a claim that outlived the grace period.
enum Orphan {
    Settled,
    Released(Ticket),
    /// The claim changed before it could be resolved.
    Moved,
}

/// Whether `elapsed` is strictly longer than `limit`. Negative spans never are.
fn exceeds(elapsed: chrono::Duration, limit: Duration) -> bool {
    elapsed.to_std().is_ok_and(|elapsed| elapsed > limit)
}

pub struct TimeoutSupervisor {
    config: Arc<MatchmakingConfig>,
    repo: TicketRepository,
    pool: Arc<PoolManager>,
    publisher: Arc<EventPublisher>,
    health: Arc<StoreHealth>,
    stats: Arc<EngineStats>,
    clock: Arc<dyn Clock>,
}

impl TimeoutSupervisor {
    pub fn new(
        config: Arc<MatchmakingConfig>,
        repo: TicketRepository,
        pool: Arc<PoolManager>,
        publisher: Arc<EventPublisher>,
        health: Arc<StoreHealth>,
        stats: Arc<EngineStats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            repo,
            pool,
            publisher,
            health,
            stats,
            clock,
        }
    }

    fn observed<T>(&self, outcome: Result<T>) -> Result<T> {
        self.health.observe(&outcome);
        if outcome.is_err() {
            self.stats.record_dependency_error();
        }
        outcome
    }

    pub async fn tick(&self) -> SupervisorReport {
        let mut report = SupervisorReport {
            publish: self.publisher.retry_due().await,
            ..SupervisorReport::default()
        };
        self.stats.record_dead_letters(report.publish.dead_lettered);

        let mark = self.pool.mark().await;
        let snapshot = match self.observed(self.repo.snapshot().await) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Supervisor could not read store snapshot");
                report.store_error = Some(e.to_string());
                return report;
            }
        };

        let max_wait = self.config.max_wait();
        let grace = self.config.claim_grace();
        let mut pending = Vec::new();

        for stored in snapshot {
            let now = self.clock.now();
            match stored.ticket.state {
                TicketState::Pending if exceeds(stored.ticket.age(now), max_wait) => {
                    match self.expire(&stored.ticket, now).await {
                        Ok(true) => report.expired += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(ticket = %stored.ticket.id, error = %e, "Expiry failed");
                        }
                    }
                }
                TicketState::Pending => pending.push(stored.ticket),
                TicketState::Claimed
                    if stored
                        .ticket
                        .claim_age(now)
                        .is_some_and(|age| exceeds(age, grace)) =>
                {
                    match self.resolve_orphan(&stored, now).await {
                        Ok(Orphan::Settled) => report.settled += 1,
                        Ok(Orphan::Released(ticket)) => {
                            report.released += 1;
                            pending.push(ticket);
                        }
                        Ok(Orphan::Moved) => {}
                        Err(e) => {
                            tracing::warn!(ticket = %stored.ticket.id, error = %e, "Orphan resolution failed");
                        }
                    }
                }
                _ => {}
            }
        }

        match self.announce_stranded(self.clock.now()).await {
            Ok(announced) => report.announced = announced,
            Err(e) => tracing::warn!(error = %e, "Could not scan for unannounced matches"),
        }

        report.reconcile = self.pool.reconcile(pending, mark).await;
        if report.reconcile.changed() {
            tracing::debug!(
                inserted = report.reconcile.inserted,
                refreshed = report.reconcile.refreshed,
                dropped = report.reconcile.dropped,
                "Pool reconciled with store"
            );
        }
        report
    }

    /// `Pending -> Expired`. `Ok(false)` if the ticket changed first.
    async fn expire(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<bool> {
        let Some(expired) = self
            .observed(self.repo.finish(ticket, TicketState::Expired, now).await)?
        else {
            tracing::debug!(ticket = %ticket.id, "Ticket left Pending before expiry");
            return Ok(false);
        };
        self.pool.remove(&expired.id).await;
        self.stats.record_expiration();
        tracing::info!(
            ticket = %expired.id,
            shard = %expired.shard,
            waited_ms = expired.age(now).num_milliseconds(),
            "Ticket expired"
        );

        let retained = self
            .repo
            .retain_ticket(&expired.id, self.config.terminal_retention())
            .await;
        if let Err(e) = self.observed(retained) {
            tracing::warn!(ticket = %expired.id, error = %e, "Failed to set retention on expired ticket");
        }

        let event = MatchmakingEvent::TicketExpired {
            ticket_id: expired.id,
            shard: expired.shard.clone(),
            at: now,
        };
        if let Err(e) = self.publisher.publish(&event).await {
            tracing::error!(ticket = %expired.id, error = %e, "Failed to emit TicketExpired");
        }
        Ok(true)
    }

    /// Settle a claim whose match was committed, release any other.
    async fn resolve_orphan(&self, stored: &StoredTicket, now: DateTime<Utc>) -> Result<Orphan> {
        if let Some(match_id) = stored.ticket.match_id {
            let formed = self
                .observed(self.repo.load_match(&match_id).await)?
                .filter(|formed| formed.contains(&stored.ticket.id));
            if let Some(formed) = formed {
                return self.settle(stored, &formed, now).await;
            }
        }

        let Some(released) = self.observed(self.repo.release(stored, now).await)? else {
            return Ok(Orphan::Moved);
        };
        self.stats.record_release();
        tracing::warn!(
            ticket = %stored.ticket.id,
            shard = %stored.ticket.shard,
            claimed_at = ?stored.ticket.claimed_at,
            "Released orphaned claim"
        );
        Ok(Orphan::Released(released.ticket))
    }

    /// `Claimed -> Matched` for a claim left behind a committed match.
    async fn settle(
        &self,
        stored: &StoredTicket,
        formed: &Match,
        now: DateTime<Utc>,
    ) -> Result<Orphan> {
        let Some(matched) = self.observed(self.repo.settle_claim(stored, formed, now).await)?
        else {
            tracing::debug!(ticket = %stored.ticket.id, "Claim changed before it could be settled");
            return Ok(Orphan::Moved);
        };
        self.pool.remove(&matched.ticket.id).await;
        tracing::warn!(
            ticket = %matched.ticket.id,
            match_id = %formed.id,
            "Settled orphaned claim against its committed match"
        );
        self.retain_matched(&matched.ticket).await;
        Ok(Orphan::Settled)
    }

    /// Publish `MatchFormed` for every match still unannounced past the
    /// grace period. The deterministic event id keeps a match that its
    /// worker did announce from reaching subscribers twice.
    async fn announce_stranded(&self, now: DateTime<Utc>) -> Result<usize> {
        let grace = self.config.claim_grace();
        let stranded = self.observed(self.repo.unannounced_matches().await)?;
        let mut announced = 0;
        for formed in stranded {
            if !exceeds(now - formed.formed_at, grace) {
                continue;
            }
            let event = MatchmakingEvent::MatchFormed(formed.clone());
            match self.publisher.publish(&event).await {
                Ok(status) => {
                    tracing::warn!(
                        match_id = %formed.id,
                        shard = %formed.shard,
                        status = ?status,
                        "Announced match on behalf of its formation worker"
                    );
                }
                Err(e) => {
                    tracing::error!(match_id = %formed.id, error = %e, "Failed to emit MatchFormed");
                    continue;
                }
            }
            match self.observed(self.repo.mark_announced(&formed).await) {
                Ok(true) => announced += 1,
                Ok(false) => {
                    tracing::debug!(match_id = %formed.id, "Match marked announced by its worker");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(match_id = %formed.id, error = %e, "Failed to mark match announced");
                    continue;
                }
            }

            let ttl = self.config.terminal_retention();
            let retained = self.repo.retain_match(&formed.id, ttl).await;
            if let Err(e) = self.observed(retained) {
                tracing::warn!(match_id = %formed.id, error = %e, "Failed to set retention on match");
            }
            for id in &formed.ticket_ids {
                match self.observed(self.repo.load(id).await) {
                    Ok(Some(stored)) if stored.ticket.state == TicketState::Matched => {
                        self.retain_matched(&stored.ticket).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(ticket = %id, error = %e, "Failed to load matched ticket");
                    }
                }
            }
        }
        Ok(announced)
    }

    async fn retain_matched(&self, ticket: &Ticket) {
        let retained = self
            .repo
            .retain_ticket(&ticket.id, self.config.terminal_retention())
            .await;
        if let Err(e) = self.observed(retained) {
            tracing::warn!(ticket = %ticket.id, error = %e, "Failed to set retention on matched ticket");
        }
    }
}
