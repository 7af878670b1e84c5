//! Typed ticket and match records on top of the [`SharedStateStore`].
//!
//! Key layout:
//!
//! | Key | Tag | Body |
//! |---|---|---|
//! | `ticket:{id}` | ticket state (`PENDING`, ...) | JSON [`Ticket`] |
//! | `requester:{mode}:{region}:{ref}` | active ticket id | empty |
//! | `match:{id}` | `FORMED`, then `ANNOUNCED` | JSON [`Match`] |
//!
//! Every state transition is a single `compare_and_swap_multi`, so the
//! requester index, the ticket record, and the match record never disagree.
//! A match stays `FORMED` until its `MatchFormed` event has been handed to
//! the publisher; the supervisor announces any match left in that state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lobbymatch_types::{
    LobbymatchError, Match, MatchId, RequesterRef, Result, ShardKey, Ticket, TicketId,
    TicketState,
};

use crate::contract::{CasOp, Precondition, SharedStateStore, StoreEntry};

pub const TICKET_PREFIX: &str = "ticket:";
pub const REQUESTER_PREFIX: &str = "requester:";
pub const MATCH_PREFIX: &str = "match:";
const MATCH_TAG: &str = "FORMED";
const ANNOUNCED_TAG: &str = "ANNOUNCED";

#[must_use]
pub fn ticket_key(id: &TicketId) -> String {
    format!("{TICKET_PREFIX}{id}")
}

#[must_use]
pub fn requester_key(shard: &ShardKey, requester: &RequesterRef) -> String {
    format!(
        "{REQUESTER_PREFIX}{}:{}:{}",
        shard.mode, shard.region, requester
    )
}

#[must_use]
pub fn match_key(id: &MatchId) -> String {
    format!("{MATCH_PREFIX}{}", id.0)
}

/// A ticket together with the exact entry it was read from or written as.
///
/// Conditional writes that must not clobber a newer version of the record
/// compare against `entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTicket {
    pub ticket: Ticket,
    pub entry: StoreEntry,
}

/// Result of an atomic multi-claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Every ticket moved `Pending -> Claimed`.
    Claimed(Vec<StoredTicket>),
    /// At least one ticket was no longer `Pending`; nothing changed.
    Conflict,
}

/// Store-authoritative ticket repository.
#[derive(Clone)]
pub struct TicketRepository {
    store: Arc<dyn SharedStateStore>,
}

impl TicketRepository {
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SharedStateStore> {
        &self.store
    }

    // -----------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------

    pub fn encode(ticket: &Ticket) -> Result<StoredTicket> {
        let body = serde_json::to_vec(ticket)?;
        Ok(StoredTicket {
            ticket: ticket.clone(),
            entry: StoreEntry::new(ticket.state.as_tag(), body),
        })
    }

    pub fn decode(key: &str, entry: StoreEntry) -> Result<StoredTicket> {
        let ticket: Ticket =
            serde_json::from_slice(&entry.body).map_err(|e| LobbymatchError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if ticket.state.as_tag() != entry.tag {
            return Err(LobbymatchError::CorruptRecord {
                key: key.to_string(),
                reason: format!("tag {} disagrees with state {}", entry.tag, ticket.state),
            });
        }
        Ok(StoredTicket { ticket, entry })
    }

    fn pending() -> Precondition {
        Precondition::TagEquals(TicketState::Pending.as_tag().to_string())
    }

    fn index_owned_by(id: &TicketId) -> Precondition {
        Precondition::TagEquals(id.to_string())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub async fn load(&self, id: &TicketId) -> Result<Option<StoredTicket>> {
        let key = ticket_key(id);
        match self.store.get(&key).await? {
            Some(entry) => Ok(Some(Self::decode(&key, entry)?)),
            None => Ok(None),
        }
    }

    /// The requester's index entry for a shard, raw.
    pub async fn requester_index(
        &self,
        shard: &ShardKey,
        requester: &RequesterRef,
    ) -> Result<Option<StoreEntry>> {
        self.store.get(&requester_key(shard, requester)).await
    }

    /// The requester's active ticket in a shard, if the index points at one.
    pub async fn active_for_requester(
        &self,
        shard: &ShardKey,
        requester: &RequesterRef,
    ) -> Result<Option<StoredTicket>> {
        let Some(index) = self.requester_index(shard, requester).await? else {
            return Ok(None);
        };
        let id = TicketId::parse(&index.tag)?;
        Ok(self
            .load(&id)
            .await?
            .filter(|stored| stored.ticket.state.is_active()))
    }

    pub async fn load_match(&self, id: &MatchId) -> Result<Option<Match>> {
        let key = match_key(id);
        match self.store.get(&key).await? {
            Some(entry) => serde_json::from_slice(&entry.body)
                .map(Some)
                .map_err(|e| LobbymatchError::CorruptRecord {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Every ticket record in the store. Undecodable records are logged
    /// and skipped so one bad entry cannot stall supervision.
    pub async fn snapshot(&self) -> Result<Vec<StoredTicket>> {
        let entries = self.store.scan_prefix(TICKET_PREFIX).await?;
        let mut tickets = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            match Self::decode(&key, entry) {
                Ok(stored) => tickets.push(stored),
                Err(e) => tracing::error!(key = %key, error = %e, "Skipping corrupt ticket record"),
            }
        }
        Ok(tickets)
    }

    // -----------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------

    /// Write a new `Pending` ticket and point the requester index at it.
    ///
    /// `stale_index` is the index entry observed for a ticket that is no
    /// longer active; it is replaced only if unchanged. Returns `false` if
    /// another submission won the index.
    pub async fn insert_new(
        &self,
        ticket: &Ticket,
        stale_index: Option<StoreEntry>,
    ) -> Result<bool> {
        let stored = Self::encode(ticket)?;
        let index_expect = match stale_index {
            Some(entry) => Precondition::EntryEquals(entry),
            None => Precondition::Absent,
        };
        let ops = vec![
            CasOp::put(ticket_key(&ticket.id), Precondition::Absent, stored.entry),
            CasOp::put(
                requester_key(&ticket.shard, &ticket.requester),
                index_expect,
                StoreEntry::marker(ticket.id.to_string()),
            ),
        ];
        self.store.compare_and_swap_multi(&ops).await
    }

    /// Atomic multi-claim: every ticket `Pending -> Claimed`, or none.
    ///
    /// Each claim records the deterministic id of the match the group would
    /// form, so an orphaned claim can later be tied back to its match record.
    pub async fn claim_all(
        &self,
        candidates: &[Ticket],
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let ids: Vec<TicketId> = candidates.iter().map(|t| t.id).collect();
        let match_id = MatchId::deterministic(&ids);
        let mut claimed = Vec::with_capacity(candidates.len());
        let mut ops = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut ticket = candidate.clone();
            ticket.mark_claimed(match_id, now)?;
            let stored = Self::encode(&ticket)?;
            ops.push(CasOp::put(
                ticket_key(&ticket.id),
                Self::pending(),
                stored.entry.clone(),
            ));
            claimed.push(stored);
        }
        if self.store.compare_and_swap_multi(&ops).await? {
            Ok(ClaimOutcome::Claimed(claimed))
        } else {
            Ok(ClaimOutcome::Conflict)
        }
    }

    /// Commit a match: write the match record, move every claimed ticket
    /// `Claimed -> Matched`, and free the requester indexes. Fails (returns
    /// `false`) if any claim is no longer exactly the one this worker took.
    pub async fn commit_match(
        &self,
        formed: &Match,
        claimed: &[StoredTicket],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut ops = Vec::with_capacity(claimed.len() * 2 + 1);
        ops.push(CasOp::put(
            match_key(&formed.id),
            Precondition::Absent,
            StoreEntry::new(MATCH_TAG, serde_json::to_vec(formed)?),
        ));
        for stored in claimed {
            let mut ticket = stored.ticket.clone();
            ticket.mark_matched(formed.id, now)?;
            let matched = Self::encode(&ticket)?;
            ops.push(CasOp::put(
                ticket_key(&ticket.id),
                Precondition::EntryEquals(stored.entry.clone()),
                matched.entry,
            ));
            ops.push(CasOp::delete(
                requester_key(&ticket.shard, &ticket.requester),
                Self::index_owned_by(&ticket.id),
            ));
        }
        self.store.compare_and_swap_multi(&ops).await
    }

    /// `Claimed -> Matched` for a claim whose match record already exists.
    ///
    /// Finishes a commit that landed partially or whose outcome was lost.
    /// Returns `None` if the claim changed or the match record is gone.
    pub async fn settle_claim(
        &self,
        claimed: &StoredTicket,
        formed: &Match,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredTicket>> {
        let mut ticket = claimed.ticket.clone();
        ticket.mark_matched(formed.id, now)?;
        let matched = Self::encode(&ticket)?;
        let ops = vec![
            CasOp::check(match_key(&formed.id), Precondition::Present),
            CasOp::put(
                ticket_key(&ticket.id),
                Precondition::EntryEquals(claimed.entry.clone()),
                matched.entry.clone(),
            ),
            CasOp::delete(
                requester_key(&ticket.shard, &ticket.requester),
                Self::index_owned_by(&ticket.id),
            ),
        ];
        if self.store.compare_and_swap_multi(&ops).await? {
            Ok(Some(matched))
        } else {
            Ok(None)
        }
    }

    /// Matches whose `MatchFormed` event was never handed to the publisher.
    pub async fn unannounced_matches(&self) -> Result<Vec<Match>> {
        let entries = self.store.scan_prefix(MATCH_PREFIX).await?;
        let mut matches = Vec::new();
        for (key, entry) in entries {
            if entry.tag != MATCH_TAG {
                continue;
            }
            match serde_json::from_slice::<Match>(&entry.body) {
                Ok(formed) => matches.push(formed),
                Err(e) => tracing::error!(key = %key, error = %e, "Skipping corrupt match record"),
            }
        }
        Ok(matches)
    }

    /// `FORMED -> ANNOUNCED`. Resets the record's TTL, so retention is
    /// applied afterwards.
    pub async fn mark_announced(&self, formed: &Match) -> Result<bool> {
        let ops = vec![CasOp::put(
            match_key(&formed.id),
            Precondition::TagEquals(MATCH_TAG.to_string()),
            StoreEntry::new(ANNOUNCED_TAG, serde_json::to_vec(formed)?),
        )];
        self.store.compare_and_swap_multi(&ops).await
    }

    /// `Claimed -> Pending`, only if the claim is still the observed one.
    pub async fn release(
        &self,
        claimed: &StoredTicket,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredTicket>> {
        let mut ticket = claimed.ticket.clone();
        ticket.mark_released(now)?;
        let released = Self::encode(&ticket)?;
        let ops = vec![CasOp::put(
            ticket_key(&ticket.id),
            Precondition::EntryEquals(claimed.entry.clone()),
            released.entry.clone(),
        )];
        if self.store.compare_and_swap_multi(&ops).await? {
            Ok(Some(released))
        } else {
            Ok(None)
        }
    }

    /// `Pending -> Expired | Cancelled`, freeing the requester index.
    /// Returns `None` if the ticket was no longer `Pending`.
    pub async fn finish(
        &self,
        pending: &Ticket,
        target: TicketState,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        let mut ticket = pending.clone();
        match target {
            TicketState::Expired => ticket.mark_expired(now)?,
            TicketState::Cancelled => ticket.mark_cancelled(now)?,
            other => {
                return Err(LobbymatchError::InvalidTransition {
                    from: ticket.state,
                    to: other,
                });
            }
        }
        let finished = Self::encode(&ticket)?;
        let ops = vec![
            CasOp::put(ticket_key(&ticket.id), Self::pending(), finished.entry),
            CasOp::delete(
                requester_key(&ticket.shard, &ticket.requester),
                Self::index_owned_by(&ticket.id),
            ),
        ];
        if self.store.compare_and_swap_multi(&ops).await? {
            Ok(Some(ticket))
        } else {
            Ok(None)
        }
    }

    /// Keep a terminal ticket readable for `ttl`, then let the store drop it.
    pub async fn retain_ticket(&self, id: &TicketId, ttl: Duration) -> Result<bool> {
        self.store.expire_after(&ticket_key(id), ttl).await
    }

    pub async fn retain_match(&self, id: &MatchId, ttl: Duration) -> Result<bool> {
        self.store.expire_after(&match_key(id), ttl).await
    }
}
