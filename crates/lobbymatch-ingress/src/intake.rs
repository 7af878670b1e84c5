//! Ticket intake: submit, cancel, and status.
//!
//! ## Submit flow
//!
//! ```text
//! request -> health gate -> normalize/validate -> requester index lookup
//!         -> conditional insert (ticket + index) -> pool enqueue
//! ```
//!
//! A requester holds at most one active ticket per shard. Resubmitting
//! while one is active returns its id as [`SubmitOutcome::DuplicateActive`].
//! The store decides races: two concurrent submissions for the same
//! requester cannot both win the index.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lobbymatch_delivery::EventSink;
use lobbymatch_matchcore::ticket_window;
use lobbymatch_store::{StoreHealth, StoredTicket, TicketRepository};
use lobbymatch_types::{
    Clock, GameMode, LobbymatchError, MatchId, MatchmakingConfig, MatchmakingEvent, Region,
    RequesterRef, Result, ShardKey, Ticket, TicketId, TicketRequest, TicketState, constants,
};
use rust_decimal::Decimal;

use crate::pool::PoolManager;

/// Rounds of index-lookup-then-insert before giving up on a contended requester.
const MAX_SUBMIT_ROUNDS: usize = 3;

/// Rounds of load-then-cancel before giving up on a ticket that keeps changing.
const MAX_CANCEL_ROUNDS: usize = 3;

/// Successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new `Pending` ticket was created.
    Created(TicketId),
    /// The requester already had an active ticket for this shard.
    DuplicateActive(TicketId),
}

impl SubmitOutcome {
    #[must_use]
    pub fn ticket_id(&self) -> TicketId {
        match self {
            Self::Created(id) | Self::DuplicateActive(id) => *id,
        }
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateActive(_))
    }
}

/// Successful cancel acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The ticket moved `Pending -> Cancelled`.
    Cancelled,
    /// The ticket had already expired or been cancelled.
    AlreadyFinished(TicketState),
}

/// A requester's view of one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketStatus {
    pub ticket_id: TicketId,
    pub state: TicketState,
    pub shard: ShardKey,
    pub party_size: u32,
    pub skill_rating: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub waited_ms: i64,
    /// Current search window, while the ticket is still searching.
    pub search_window: Option<Decimal>,
    /// Set once the ticket is `Matched`.
    pub match_id: Option<MatchId>,
}

/// Normalized, validated submission.
struct Normalized {
    shard: ShardKey,
    party_size: u32,
    skill_rating: Decimal,
    requester: RequesterRef,
}

/// Validates requests into tickets and owns the cancel/status surface.
pub struct TicketIntake {
    config: Arc<MatchmakingConfig>,
    repo: TicketRepository,
    pool: Arc<PoolManager>,
    events: Arc<dyn EventSink>,
    health: Arc<StoreHealth>,
    clock: Arc<dyn Clock>,
}

impl TicketIntake {
    pub fn new(
        config: Arc<MatchmakingConfig>,
        repo: TicketRepository,
        pool: Arc<PoolManager>,
        events: Arc<dyn EventSink>,
        health: Arc<StoreHealth>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            repo,
            pool,
            events,
            health,
            clock,
        }
    }

    fn observed<T>(&self, outcome: Result<T>) -> Result<T> {
        self.health.observe(&outcome);
        outcome
    }

    // -----------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------

    fn normalize(&self, request: &TicketRequest) -> Result<Normalized> {
        let mode = GameMode::new(&request.mode);
        if mode.as_str().is_empty() {
            return Err(LobbymatchError::invalid("mode is required"));
        }
        let Some(mode_config) = self.config.mode(&mode) else {
            return Err(LobbymatchError::UnsupportedMode(mode.to_string()));
        };

        let region = Region::new(&request.region);
        if region.as_str().is_empty() {
            return Err(LobbymatchError::invalid("region is required"));
        }
        if region.as_str().len() > constants::MAX_REGION_LEN {
            return Err(LobbymatchError::invalid(format!(
                "region exceeds {} characters",
                constants::MAX_REGION_LEN
            )));
        }
        if !self.config.region_allowed(&region) {
            return Err(LobbymatchError::UnsupportedRegion(region.to_string()));
        }

        if request.party_size == 0 || request.party_size > mode_config.max_party_size {
            return Err(LobbymatchError::invalid(format!(
                "party_size {} outside 1..={} for mode {mode}",
                request.party_size, mode_config.max_party_size
            )));
        }

        let skill_rating = request
            .skill_rating
            .unwrap_or(self.config.default_skill_rating);
        if skill_rating < self.config.min_skill_rating || skill_rating > self.config.max_skill_rating
        {
            return Err(LobbymatchError::invalid(format!(
                "skill_rating {skill_rating} outside {}..={}",
                self.config.min_skill_rating, self.config.max_skill_rating
            )));
        }

        let requester = request.requester.trim();
        if requester.is_empty() {
            return Err(LobbymatchError::invalid("requester is required"));
        }
        if requester.len() > constants::MAX_REQUESTER_REF_LEN {
            return Err(LobbymatchError::invalid(format!(
                "requester exceeds {} characters",
                constants::MAX_REQUESTER_REF_LEN
            )));
        }

        Ok(Normalized {
            shard: ShardKey { mode, region },
            party_size: request.party_size,
            skill_rating,
            requester: RequesterRef::new(requester),
        })
    }

    // -----------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------

    /// Validate a request and create its ticket, or return the requester's
    /// active ticket for the same shard.
    pub async fn submit(&self, request: TicketRequest) -> Result<SubmitOutcome> {
        self.health.ensure_available()?;
        let normalized = self.normalize(&request)?;

        for _ in 0..MAX_SUBMIT_ROUNDS {
            let index = self.observed(
                self.repo
                    .requester_index(&normalized.shard, &normalized.requester)
                    .await,
            )?;

            let stale_index = match index {
                Some(entry) => {
                    let existing = TicketId::parse(&entry.tag)?;
                    let active = self
                        .observed(self.repo.load(&existing).await)?
                        .is_some_and(|stored| stored.ticket.state.is_active());
                    if active {
                        tracing::debug!(
                            ticket = %existing,
                            requester = %normalized.requester,
                            "Duplicate submission; returning active ticket"
                        );
                        return Ok(SubmitOutcome::DuplicateActive(existing));
                    }
                    Some(entry)
                }
                None => None,
            };

            let ticket = Ticket::new(
                normalized.requester.clone(),
                normalized.shard.clone(),
                normalized.party_size,
                normalized.skill_rating,
                self.clock.now(),
            );
            if self.observed(self.repo.insert_new(&ticket, stale_index).await)? {
                let id = ticket.id;
                tracing::info!(
                    ticket = %id,
                    shard = %ticket.shard,
                    party_size = ticket.party_size,
                    skill = %ticket.skill_rating,
                    "Ticket submitted"
                );
                self.pool.enqueue(ticket).await?;
                return Ok(SubmitOutcome::Created(id));
            }
            tracing::debug!(requester = %normalized.requester, "Requester index contended; retrying");
        }

        Err(LobbymatchError::store_unavailable(format!(
            "requester index for {} kept changing",
            normalized.requester
        )))
    }

    async fn load_owned(&self, id: &TicketId, requester: &str) -> Result<StoredTicket> {
        let stored = self
            .observed(self.repo.load(id).await)?
            .ok_or(LobbymatchError::TicketNotFound(*id))?;
        if stored.ticket.requester.as_str() != requester.trim() {
            return Err(LobbymatchError::TicketAccessDenied(*id));
        }
        Ok(stored)
    }

    /// Withdraw a ticket.
    ///
    /// `Pending` tickets are cancelled. Claimed or matched tickets are
    /// rejected with `AlreadyMatched`: the claim stands. Tickets that
    /// already expired or were cancelled are acknowledged as they are.
    pub async fn cancel(&self, id: &TicketId, requester: &str) -> Result<CancelOutcome> {
        for _ in 0..MAX_CANCEL_ROUNDS {
            let stored = self.load_owned(id, requester).await?;
            match stored.ticket.state {
                TicketState::Pending => {
                    let now = self.clock.now();
                    let finished = self.observed(
                        self.repo
                            .finish(&stored.ticket, TicketState::Cancelled, now)
                            .await,
                    )?;
                    let Some(ticket) = finished else {
                        // Claimed or expired between the read and the write.
                        continue;
                    };
                    self.pool.remove(id).await;
                    self.retain(&ticket).await;
                    tracing::info!(ticket = %id, shard = %ticket.shard, "Ticket cancelled");
                    let event = MatchmakingEvent::TicketCancelled {
                        ticket_id: ticket.id,
                        shard: ticket.shard.clone(),
                        at: now,
                    };
                    if let Err(e) = self.events.emit(event).await {
                        tracing::error!(ticket = %id, error = %e, "Failed to emit cancellation");
                    }
                    return Ok(CancelOutcome::Cancelled);
                }
                TicketState::Claimed | TicketState::Matched => {
                    tracing::debug!(ticket = %id, state = %stored.ticket.state, "Cancel rejected");
                    return Err(LobbymatchError::AlreadyMatched(*id));
                }
                state @ (TicketState::Expired | TicketState::Cancelled) => {
                    return Ok(CancelOutcome::AlreadyFinished(state));
                }
            }
        }
        Err(LobbymatchError::store_unavailable(format!(
            "ticket {id} kept changing during cancel"
        )))
    }

    /// Current state of a ticket owned by `requester`.
    pub async fn status(&self, id: &TicketId, requester: &str) -> Result<TicketStatus> {
        let ticket = self.load_owned(id, requester).await?.ticket;
        let now = self.clock.now();
        let search_window = ticket.is_pending().then(|| {
            ticket_window(self.config.window_for(&ticket.shard.mode), &ticket, now)
        });
        Ok(TicketStatus {
            ticket_id: ticket.id,
            state: ticket.state,
            party_size: ticket.party_size,
            skill_rating: ticket.skill_rating,
            submitted_at: ticket.submitted_at,
            waited_ms: ticket.age(now).num_milliseconds(),
            search_window,
            match_id: ticket
                .match_id
                .filter(|_| ticket.state == TicketState::Matched),
            shard: ticket.shard,
        })
    }

    async fn retain(&self, ticket: &Ticket) {
        let outcome = self
            .repo
            .retain_ticket(&ticket.id, self.config.terminal_retention())
            .await;
        if let Err(e) = self.observed(outcome) {
            tracing::warn!(ticket = %ticket.id, error = %e, "Failed to set retention on terminal ticket");
        }
    }
}

#[cfg(test)]
mod tests {
    use lobbymatch_delivery::{DeadLetterLog, EventPublisher, InMemoryBus};
    use lobbymatch_store::{FlakyStore, InMemoryStore};
    use lobbymatch_types::{EventType, ManualClock};

    use super::*;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<FlakyStore<InMemoryStore>>,
        bus: Arc<InMemoryBus>,
        pool: Arc<PoolManager>,
        intake: TicketIntake,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::fixed());
        let store = Arc::new(FlakyStore::new(InMemoryStore::with_clock(clock.clone())));
        let bus = Arc::new(InMemoryBus::new());
        let config = Arc::new(MatchmakingConfig::default());
        let publisher = Arc::new(EventPublisher::new(
            bus.clone(),
            &config.publisher,
            clock.clone(),
            DeadLetterLog::new(),
        ));
        let pool = PoolManager::new();
        let health = Arc::new(StoreHealth::new(clock.clone(), config.store_outage_ceiling()));
        let intake = TicketIntake::new(
            config,
            TicketRepository::new(store.clone()),
            pool.clone(),
            publisher,
            health,
            clock.clone(),
        );
        Harness {
            clock,
            store,
            bus,
            pool,
            intake,
        }
    }

    fn request(requester: &str) -> TicketRequest {
        TicketRequest::new("casual", "eu-west", 1, Some(Decimal::new(1200, 0)), requester)
    }

    #[tokio::test]
    async fn submit_creates_pending_ticket_in_pool() {
        let h = harness();
        let outcome = h.intake.submit(request("alice")).await.unwrap();
        assert!(!outcome.is_duplicate());
        assert!(h.pool.contains(&outcome.ticket_id()).await);
        let status = h.intake.status(&outcome.ticket_id(), "alice").await.unwrap();
        assert_eq!(status.state, TicketState::Pending);
        assert_eq!(status.search_window, Some(Decimal::new(50, 0)));
    }

    #[tokio::test]
    async fn resubmission_returns_same_id() {
        let h = harness();
        let first = h.intake.submit(request("alice")).await.unwrap();
        let second = h.intake.submit(request("alice")).await.unwrap();
        assert_eq!(second, SubmitOutcome::DuplicateActive(first.ticket_id()));
        assert_eq!(h.pool.total_depth().await, 1);
    }

    #[tokio::test]
    async fn normalizes_mode_and_region() {
        let h = harness();
        let req = TicketRequest::new(" RANK ", "EU-West", 1, None, "bob");
        let id = h.intake.submit(req).await.unwrap().ticket_id();
        let status = h.intake.status(&id, "bob").await.unwrap();
        assert_eq!(status.shard, ShardKey::new("rank", "eu-west"));
        assert_eq!(status.skill_rating, Decimal::new(1000, 0), "default rating applied");
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let h = harness();
        let cases = [
            TicketRequest::new("casual", "eu-west", 0, None, "a"),
            TicketRequest::new("casual", "eu-west", 3, None, "a"),
            TicketRequest::new("", "eu-west", 1, None, "a"),
            TicketRequest::new("casual", "  ", 1, None, "a"),
            TicketRequest::new("casual", "eu-west", 1, None, "   "),
            TicketRequest::new("casual", "eu-west", 1, Some(Decimal::new(-5, 0)), "a"),
            TicketRequest::new("casual", "eu-west", 1, Some(Decimal::new(10_001, 0)), "a"),
            TicketRequest::new("casual", "eu-west", 1, None, "x".repeat(200)),
        ];
        for req in cases {
            let err = h.intake.submit(req.clone()).await.unwrap_err();
            assert!(
                matches!(err, LobbymatchError::InvalidRequest { .. }),
                "{req:?} -> {err}"
            );
        }
        let err = h
            .intake
            .submit(TicketRequest::new("arena", "eu-west", 1, None, "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, LobbymatchError::UnsupportedMode(m) if m == "arena"));
        assert_eq!(h.pool.total_depth().await, 0);
    }

    #[tokio::test]
    async fn cancel_pending_emits_event() {
        let h = harness();
        let id = h.intake.submit(request("alice")).await.unwrap().ticket_id();
        assert_eq!(
            h.intake.cancel(&id, "alice").await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert!(!h.pool.contains(&id).await);
        let envelopes = h.bus.envelopes().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event_type, EventType::TicketCancelled);
        assert_eq!(envelopes[0].ticket_ids, vec![id]);

        // Second cancel acknowledges the terminal state.
        assert_eq!(
            h.intake.cancel(&id, "alice").await.unwrap(),
            CancelOutcome::AlreadyFinished(TicketState::Cancelled)
        );
        // And the requester may queue again.
        let again = h.intake.submit(request("alice")).await.unwrap();
        assert!(!again.is_duplicate());
        assert_ne!(again.ticket_id(), id);
    }

    #[tokio::test]
    async fn cancel_after_claim_is_already_matched() {
        let h = harness();
        let id = h.intake.submit(request("alice")).await.unwrap().ticket_id();
        let repo = TicketRepository::new(h.store.clone());
        let stored = repo.load(&id).await.unwrap().unwrap();
        repo.claim_all(&[stored.ticket], h.clock.now()).await.unwrap();

        let err = h.intake.cancel(&id, "alice").await.unwrap_err();
        assert!(matches!(err, LobbymatchError::AlreadyMatched(t) if t == id));
        let status = h.intake.status(&id, "alice").await.unwrap();
        assert_eq!(status.state, TicketState::Claimed);
        assert!(status.match_id.is_none(), "uncommitted claims expose no match");
    }

    #[tokio::test]
    async fn other_requester_is_denied() {
        let h = harness();
        let id = h.intake.submit(request("alice")).await.unwrap().ticket_id();
        assert!(matches!(
            h.intake.status(&id, "mallory").await.unwrap_err(),
            LobbymatchError::TicketAccessDenied(_)
        ));
        assert!(matches!(
            h.intake.cancel(&id, "mallory").await.unwrap_err(),
            LobbymatchError::TicketAccessDenied(_)
        ));
        assert!(matches!(
            h.intake.status(&TicketId::new(), "alice").await.unwrap_err(),
            LobbymatchError::TicketNotFound(_)
        ));
    }

    #[tokio::test]
    async fn store_outage_is_transient_then_degrades() {
        let h = harness();
        h.store.set_down(true);
        let err = h.intake.submit(request("alice")).await.unwrap_err();
        assert!(err.is_transient());

        h.clock.advance(std::time::Duration::from_secs(31));
        let err = h.intake.submit(request("alice")).await.unwrap_err();
        assert!(matches!(err, LobbymatchError::EngineDegraded { .. }));

        h.store.set_down(false);
        // Degraded intake does not probe; recovery comes from the supervisor.
        assert!(h.intake.submit(request("alice")).await.is_err());
    }
}
