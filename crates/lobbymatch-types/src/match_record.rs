//! Match records produced by the formation engine.
//!
//! A [`Match`] is immutable once formed: its participant set is disjoint
//! from every other match and its summed party size equals the mode's
//! participant count exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MatchId, RequesterRef, ShardKey, Ticket, TicketId};

/// A finalized grouping of tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Deterministic from the participant ticket ids.
    pub id: MatchId,
    /// The shard the participants were drawn from.
    pub shard: ShardKey,
    /// Participant tickets; the anchor (oldest) comes first.
    pub ticket_ids: Vec<TicketId>,
    /// Requesters, in the same order as `ticket_ids`.
    pub requesters: Vec<RequesterRef>,
    /// When the match was committed.
    pub formed_at: DateTime<Utc>,
    /// Highest minus lowest skill rating among participants.
    pub skill_spread: Decimal,
    /// Summed party sizes.
    pub participants: u32,
}

impl Match {
    /// Build a match from claimed tickets, preserving their order.
    #[must_use]
    pub fn from_tickets(shard: ShardKey, tickets: &[Ticket], formed_at: DateTime<Utc>) -> Self {
        let ticket_ids: Vec<TicketId> = tickets.iter().map(|t| t.id).collect();
        let requesters = tickets.iter().map(|t| t.requester.clone()).collect();
        let max = tickets.iter().map(|t| t.skill_rating).max();
        let min = tickets.iter().map(|t| t.skill_rating).min();
        let skill_spread = match (max, min) {
            (Some(hi), Some(lo)) => hi - lo,
            _ => Decimal::ZERO,
        };
        Self {
            id: MatchId::deterministic(&ticket_ids),
            shard,
            ticket_ids,
            requesters,
            formed_at,
            skill_spread,
            participants: tickets.iter().map(|t| t.party_size).sum(),
        }
    }

    /// Returns `true` if the ticket participates in this match.
    #[must_use]
    pub fn contains(&self, ticket_id: &TicketId) -> bool {
        self.ticket_ids.contains(ticket_id)
    }

    /// Returns `true` if no ticket is shared with `other`.
    #[must_use]
    pub fn is_disjoint_from(&self, other: &Match) -> bool {
        !self.ticket_ids.iter().any(|id| other.contains(id))
    }
}

impl std::fmt::Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Match[{}] {} tickets={} participants={} spread={}",
            self.id,
            self.shard,
            self.ticket_ids.len(),
            self.participants,
            self.skill_spread,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_match() -> Match {
        let shard = ShardKey::new("casual", "eu-west");
        let now = Utc::now();
        let tickets = vec![
            Ticket::dummy(&shard, 1000, now),
            Ticket::dummy(&shard, 1040, now),
            Ticket::dummy_party(&shard, 2, 990, now),
        ];
        Match::from_tickets(shard, &tickets, now)
    }

    #[test]
    fn spread_and_participants() {
        let m = make_match();
        assert_eq!(m.skill_spread, Decimal::new(50, 0));
        assert_eq!(m.participants, 4);
        assert_eq!(m.ticket_ids.len(), 3);
        assert_eq!(m.requesters.len(), 3);
    }

    #[test]
    fn id_is_derived_from_tickets() {
        let m = make_match();
        assert_eq!(m.id, MatchId::deterministic(&m.ticket_ids));
    }

    #[test]
    fn disjointness() {
        let a = make_match();
        let b = make_match();
        assert!(a.is_disjoint_from(&b));
        assert!(!a.is_disjoint_from(&a));
    }

    #[test]
    fn display_mentions_shard() {
        let s = format!("{}", make_match());
        assert!(s.contains("casual/eu-west"));
        assert!(s.contains("participants=4"));
    }
}
