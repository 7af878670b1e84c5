//! Greedy, deterministic grouping over one shard's candidates.
//!
//! ## Algorithm
//!
//! 1. Order candidates oldest first (`submitted_at`, then id).
//! 2. Take the oldest unused ticket as the anchor.
//! 3. Rank the remaining unused tickets that mutually accept the anchor:
//!    larger current window first (older), then smaller skill difference
//!    to the anchor, then age, then id.
//! 4. Walk the ranking and add each ticket whose party still fits, until
//!    the summed party sizes equal the mode's participant count.
//! 5. A full group is proposed and its tickets marked used. An anchor that
//!    cannot be completed is skipped for this pass and its tentative
//!    picks stay available to later anchors.
//!
//! Identical inputs produce identical proposals. Proposals within one pass
//! are disjoint, but they are candidates only: the store-side multi-claim
//! decides whether they become matches.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lobbymatch_types::{Ticket, TicketId, WindowPolicy};
use rust_decimal::Decimal;

use crate::window::{mutually_accept, ticket_window};

/// A candidate group, not yet claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedGroup {
    /// Anchor first, then picks in ranking order.
    pub tickets: Vec<Ticket>,
    pub skill_spread: Decimal,
    pub participants: u32,
}

impl ProposedGroup {
    fn new(tickets: Vec<Ticket>) -> Self {
        let max = tickets.iter().map(|t| t.skill_rating).max();
        let min = tickets.iter().map(|t| t.skill_rating).min();
        let skill_spread = match (max, min) {
            (Some(hi), Some(lo)) => hi - lo,
            _ => Decimal::ZERO,
        };
        let participants = tickets.iter().map(|t| t.party_size).sum();
        Self {
            tickets,
            skill_spread,
            participants,
        }
    }

    #[must_use]
    pub fn anchor(&self) -> Option<&Ticket> {
        self.tickets.first()
    }

    #[must_use]
    pub fn ticket_ids(&self) -> Vec<TicketId> {
        self.tickets.iter().map(|t| t.id).collect()
    }
}

fn by_age(a: &Ticket, b: &Ticket) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Form as many disjoint groups as the candidates allow.
#[must_use]
pub fn form_groups(
    candidates: &[Ticket],
    participants: u32,
    policy: &WindowPolicy,
    now: DateTime<Utc>,
) -> Vec<ProposedGroup> {
    if participants == 0 {
        return Vec::new();
    }
    let mut ordered: Vec<&Ticket> = candidates.iter().filter(|t| t.is_pending()).collect();
    ordered.sort_by(|a, b| by_age(a, b));

    let mut used: HashSet<TicketId> = HashSet::new();
    let mut groups = Vec::new();

    for anchor in &ordered {
        if used.contains(&anchor.id) || anchor.party_size > participants {
            continue;
        }
        if let Some(members) = fill_from_anchor(anchor, &ordered, &used, participants, policy, now)
        {
            used.extend(members.iter().map(|t| t.id));
            groups.push(ProposedGroup::new(members));
        }
    }
    groups
}

/// Try to complete a group around `anchor` from unused candidates.
fn fill_from_anchor(
    anchor: &Ticket,
    ordered: &[&Ticket],
    used: &HashSet<TicketId>,
    participants: u32,
    policy: &WindowPolicy,
    now: DateTime<Utc>,
) -> Option<Vec<Ticket>> {
    let mut ranked: Vec<(Decimal, Decimal, &Ticket)> = ordered
        .iter()
        .copied()
        .filter(|t| t.id != anchor.id && !used.contains(&t.id))
        .filter(|t| mutually_accept(policy, anchor, t, now))
        .map(|t| {
            let window = ticket_window(policy, t, now);
            let diff = (t.skill_rating - anchor.skill_rating).abs();
            (window, diff, t)
        })
        .collect();
    ranked.sort_by(|(wa, da, a), (wb, db, b)| {
        wb.cmp(wa).then_with(|| da.cmp(db)).then_with(|| by_age(a, b))
    });

    let mut members = vec![anchor.clone()];
    let mut total = anchor.party_size;
    for (_, _, candidate) in ranked {
        if total == participants {
            break;
        }
        if total + candidate.party_size <= participants {
            total += candidate.party_size;
            members.push(candidate.clone());
        }
    }
    (total == participants).then_some(members)
}
