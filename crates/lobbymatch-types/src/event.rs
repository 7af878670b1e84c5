//! Events emitted to the message bus.
//!
//! Downstream services (notification, entitlement, gateway) subscribe
//! independently; the engine does not track subscribers. The wire form is
//! the [`EventEnvelope`], a stable JSON schema.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EventId, Match, MatchId, Result, ShardKey, TicketId};

/// An event produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingEvent {
    /// A match was committed.
    MatchFormed(Match),
    /// A ticket waited past the maximum wait threshold.
    TicketExpired {
        ticket_id: TicketId,
        shard: ShardKey,
        at: DateTime<Utc>,
    },
    /// A ticket was withdrawn by its requester.
    TicketCancelled {
        ticket_id: TicketId,
        shard: ShardKey,
        at: DateTime<Utc>,
    },
}

impl MatchmakingEvent {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::MatchFormed(_) => EventType::MatchFormed,
            Self::TicketExpired { .. } => EventType::TicketExpired,
            Self::TicketCancelled { .. } => EventType::TicketCancelled,
        }
    }

    /// Deterministic id: the same event always maps to the same id.
    #[must_use]
    pub fn event_id(&self) -> EventId {
        let kind = self.event_type().as_str();
        match self {
            Self::MatchFormed(m) => EventId::deterministic(kind, &m.id.0),
            Self::TicketExpired { ticket_id, .. } | Self::TicketCancelled { ticket_id, .. } => {
                EventId::deterministic(kind, &ticket_id.0)
            }
        }
    }
}

/// Discriminator written into every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MatchFormed,
    TicketExpired,
    TicketCancelled,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchFormed => "MATCH_FORMED",
            Self::TicketExpired => "TICKET_EXPIRED",
            Self::TicketCancelled => "TICKET_CANCELLED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized record published to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: EventType,
    /// Present for `MATCH_FORMED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    pub ticket_ids: Vec<TicketId>,
    pub mode: String,
    pub region: String,
    pub occurred_at: DateTime<Utc>,
    /// Present for `MATCH_FORMED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_spread: Option<Decimal>,
}

impl EventEnvelope {
    #[must_use]
    pub fn from_event(event: &MatchmakingEvent) -> Self {
        let event_id = event.event_id();
        let event_type = event.event_type();
        match event {
            MatchmakingEvent::MatchFormed(m) => Self {
                event_id,
                event_type,
                match_id: Some(m.id),
                ticket_ids: m.ticket_ids.clone(),
                mode: m.shard.mode.to_string(),
                region: m.shard.region.to_string(),
                occurred_at: m.formed_at,
                skill_spread: Some(m.skill_spread),
            },
            MatchmakingEvent::TicketExpired {
                ticket_id,
                shard,
                at,
            }
            | MatchmakingEvent::TicketCancelled {
                ticket_id,
                shard,
                at,
            } => Self {
                event_id,
                event_type,
                match_id: None,
                ticket_ids: vec![*ticket_id],
                mode: shard.mode.to_string(),
                region: shard.region.to_string(),
                occurred_at: *at,
                skill_spread: None,
            },
        }
    }

    /// Encode as the JSON payload sent on the bus.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload received from the bus.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ticket;

    fn formed() -> MatchmakingEvent {
        let shard = ShardKey::new("rank", "us-east");
        let now = Utc::now();
        let tickets = vec![Ticket::dummy(&shard, 1500, now), Ticket::dummy(&shard, 1510, now)];
        MatchmakingEvent::MatchFormed(Match::from_tickets(shard, &tickets, now))
    }

    #[test]
    fn envelope_for_match_formed() {
        let event = formed();
        let env = EventEnvelope::from_event(&event);
        assert_eq!(env.event_type, EventType::MatchFormed);
        assert!(env.match_id.is_some());
        assert_eq!(env.ticket_ids.len(), 2);
        assert_eq!(env.mode, "rank");
        assert_eq!(env.region, "us-east");
        assert_eq!(env.skill_spread, Some(Decimal::new(10, 0)));
    }

    #[test]
    fn envelope_for_expiry_has_no_match() {
        let ticket_id = TicketId::new();
        let event = MatchmakingEvent::TicketExpired {
            ticket_id,
            shard: ShardKey::new("casual", "eu-west"),
            at: Utc::now(),
        };
        let env = EventEnvelope::from_event(&event);
        assert_eq!(env.event_type, EventType::TicketExpired);
        assert_eq!(env.ticket_ids, vec![ticket_id]);
        assert!(env.match_id.is_none());
    }

    #[test]
    fn wire_schema_uses_screaming_event_type() {
        let env = EventEnvelope::from_event(&formed());
        let json = String::from_utf8(env.to_json_bytes().unwrap()).unwrap();
        assert!(json.contains("\"event_type\":\"MATCH_FORMED\""), "{json}");
        assert!(json.contains("\"event_id\""));
        assert!(json.contains("\"occurred_at\""));
        let back = EventEnvelope::from_json_bytes(json.as_bytes()).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn event_id_is_stable() {
        let event = formed();
        assert_eq!(event.event_id(), event.clone().event_id());
    }
}
