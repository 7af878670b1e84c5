//! # Ticket: a single match request
//!
//! A ticket represents one participant or party waiting for a match.
//! It belongs to exactly one pool shard, fixed at creation by
//! (mode, region), and never migrates.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  claim   ┌─────────┐  commit   ┌─────────┐
//!   │ PENDING ├─────────▶│ CLAIMED ├──────────▶│ MATCHED │
//!   └──┬───┬──┘◀─────────┴─────────┘           └─────────┘
//!      │   │     release
//!      │   │ cancel      ┌───────────┐
//!      │   └────────────▶│ CANCELLED │
//!      │ expire          └───────────┘
//!      ▼
//!   ┌─────────┐
//!   │ EXPIRED │
//!   └─────────┘
//! ```
//!
//! The search window is **not** stored: it is a pure function of the
//! ticket's age, computed by the matchcore window policy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LobbymatchError, MatchId, RequesterRef, Result, ShardKey, TicketId};

/// The lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketState {
    /// Waiting in its pool shard. The only state visible to scans.
    Pending,
    /// Reserved by a formation attempt via an atomic multi-claim.
    Claimed,
    /// Part of a committed match. **Irreversible.**
    Matched,
    /// Waited longer than the maximum wait threshold.
    Expired,
    /// Withdrawn by its requester before any claim.
    Cancelled,
}

impl TicketState {
    /// Can a ticket move from this state to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Claimed | Self::Expired | Self::Cancelled
            ) | (Self::Claimed, Self::Matched | Self::Pending)
        )
    }

    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Matched | Self::Expired | Self::Cancelled)
    }

    /// Active tickets still hold the requester's slot for their shard.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Claimed)
    }

    /// Compact tag stored alongside the record for conditional writes.
    #[must_use]
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Matched => "MATCHED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Inverse of [`TicketState::as_tag`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PENDING" => Some(Self::Pending),
            "CLAIMED" => Some(Self::Claimed),
            "MATCHED" => Some(Self::Matched),
            "EXPIRED" => Some(Self::Expired),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Raw inbound request, before validation and normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRequest {
    pub mode: String,
    pub region: String,
    pub party_size: u32,
    /// Falls back to the configured default when absent.
    pub skill_rating: Option<Decimal>,
    pub requester: String,
}

impl TicketRequest {
    #[must_use]
    pub fn new(
        mode: impl Into<String>,
        region: impl Into<String>,
        party_size: u32,
        skill_rating: Option<Decimal>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            mode: mode.into(),
            region: region.into(),
            party_size,
            skill_rating,
            requester: requester.into(),
        }
    }
}

/// A match request held in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub requester: RequesterRef,
    pub shard: ShardKey,
    /// Number of participants this ticket brings into a match.
    pub party_size: u32,
    pub skill_rating: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub state: TicketState,
    /// Set while `Claimed`; used to detect orphaned claims.
    pub claimed_at: Option<DateTime<Utc>>,
    /// While `Claimed`, the match the claim was taken for. Once `Matched`,
    /// the committed match.
    pub match_id: Option<MatchId>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Create a new `Pending` ticket.
    #[must_use]
    pub fn new(
        requester: RequesterRef,
        shard: ShardKey,
        party_size: u32,
        skill_rating: Decimal,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            requester,
            shard,
            party_size,
            skill_rating,
            submitted_at,
            state: TicketState::Pending,
            claimed_at: None,
            match_id: None,
            updated_at: submitted_at,
        }
    }

    /// Time waited since submission. Never negative.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.submitted_at).max(chrono::Duration::zero())
    }

    /// Time since the claim was taken, if claimed.
    #[must_use]
    pub fn claim_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.claimed_at
            .map(|at| (now - at).max(chrono::Duration::zero()))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == TicketState::Pending
    }

    fn transition(&mut self, target: TicketState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(LobbymatchError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        self.updated_at = now;
        Ok(())
    }

    /// `Pending → Claimed`, reserved for `match_id`.
    pub fn mark_claimed(&mut self, match_id: MatchId, now: DateTime<Utc>) -> Result<()> {
        self.transition(TicketState::Claimed, now)?;
        self.claimed_at = Some(now);
        self.match_id = Some(match_id);
        Ok(())
    }

    /// `Claimed → Matched`.
    pub fn mark_matched(&mut self, match_id: MatchId, now: DateTime<Utc>) -> Result<()> {
        self.transition(TicketState::Matched, now)?;
        self.match_id = Some(match_id);
        Ok(())
    }

    /// `Claimed → Pending`, dropping the claim.
    pub fn mark_released(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TicketState::Pending, now)?;
        self.claimed_at = None;
        self.match_id = None;
        Ok(())
    }

    /// `Pending → Expired`.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TicketState::Expired, now)
    }

    /// `Pending → Cancelled`.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TicketState::Cancelled, now)
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Ticket {
    /// A solo `Pending` ticket with a fresh requester.
    pub fn dummy(shard: &ShardKey, skill_rating: i64, submitted_at: DateTime<Utc>) -> Self {
        Self::dummy_party(shard, 1, skill_rating, submitted_at)
    }

    /// A `Pending` ticket for a party of `party_size`.
    pub fn dummy_party(
        shard: &ShardKey,
        party_size: u32,
        skill_rating: i64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let id = TicketId::new();
        Self {
            id,
            requester: RequesterRef::new(format!("requester-{id}")),
            shard: shard.clone(),
            party_size,
            skill_rating: Decimal::new(skill_rating, 0),
            submitted_at,
            state: TicketState::Pending,
            claimed_at: None,
            match_id: None,
            updated_at: submitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ticket() -> Ticket {
        Ticket::dummy(&ShardKey::new("casual", "eu-west"), 1000, Utc::now())
    }

    #[test]
    fn state_transitions_valid() {
        assert!(TicketState::Pending.can_transition_to(TicketState::Claimed));
        assert!(TicketState::Pending.can_transition_to(TicketState::Expired));
        assert!(TicketState::Pending.can_transition_to(TicketState::Cancelled));
        assert!(TicketState::Claimed.can_transition_to(TicketState::Matched));
        assert!(TicketState::Claimed.can_transition_to(TicketState::Pending));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TicketState::Pending.can_transition_to(TicketState::Matched));
        assert!(!TicketState::Claimed.can_transition_to(TicketState::Cancelled));
        assert!(!TicketState::Claimed.can_transition_to(TicketState::Expired));
        assert!(!TicketState::Matched.can_transition_to(TicketState::Pending));
        assert!(!TicketState::Expired.can_transition_to(TicketState::Pending));
        assert!(!TicketState::Cancelled.can_transition_to(TicketState::Claimed));
    }

    #[test]
    fn claim_then_match() {
        let mut t = make_ticket();
        let now = Utc::now();
        let match_id = MatchId::deterministic(&[t.id]);
        t.mark_claimed(match_id, now).unwrap();
        assert_eq!(t.claimed_at, Some(now));
        assert_eq!(t.match_id, Some(match_id), "claim records its intended match");
        t.mark_matched(match_id, now).unwrap();
        assert_eq!(t.state, TicketState::Matched);
        assert_eq!(t.match_id, Some(match_id));
    }

    #[test]
    fn release_returns_to_pending() {
        let mut t = make_ticket();
        t.mark_claimed(MatchId::deterministic(&[t.id]), Utc::now()).unwrap();
        t.mark_released(Utc::now()).unwrap();
        assert!(t.is_pending());
        assert!(t.claimed_at.is_none());
        assert!(t.match_id.is_none());
    }

    #[test]
    fn matched_cannot_be_cancelled() {
        let mut t = make_ticket();
        let match_id = MatchId::deterministic(&[t.id]);
        t.mark_claimed(match_id, Utc::now()).unwrap();
        t.mark_matched(match_id, Utc::now())
            .unwrap();
        let err = t.mark_cancelled(Utc::now()).unwrap_err();
        assert!(matches!(err, LobbymatchError::InvalidTransition { .. }));
    }

    #[test]
    fn tag_roundtrip() {
        for state in [
            TicketState::Pending,
            TicketState::Claimed,
            TicketState::Matched,
            TicketState::Expired,
            TicketState::Cancelled,
        ] {
            assert_eq!(TicketState::from_tag(state.as_tag()), Some(state));
        }
        assert_eq!(TicketState::from_tag("UNKNOWN"), None);
    }

    #[test]
    fn age_is_never_negative() {
        let t = make_ticket();
        let earlier = t.submitted_at - chrono::Duration::seconds(5);
        assert_eq!(t.age(earlier), chrono::Duration::zero());
        let later = t.submitted_at + chrono::Duration::seconds(5);
        assert_eq!(t.age(later), chrono::Duration::seconds(5));
    }

    #[test]
    fn serde_roundtrip() {
        let t = make_ticket();
        let json = serde_json::to_string(&t).unwrap();
        let back: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
