//! Identifiers used throughout LobbyMatch.
//!
//! Ticket ids use UUIDv7 for time-ordered sorting. Match and event ids
//! are derived deterministically from their contents so that a retried
//! commit or publish produces the same id.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn digest_to_uuid(hasher: Sha256) -> Uuid {
    let hash = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    Uuid::from_bytes(bytes)
}

// ---------------------------------------------------------------------------
// TicketId
// ---------------------------------------------------------------------------

/// Globally unique ticket identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TicketId(pub Uuid);

impl TicketId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse the hyphenated form produced by `Display`.
    pub fn parse(value: &str) -> crate::Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| crate::LobbymatchError::Serialization(format!("bad ticket id {value}: {e}")))
    }

    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MatchId
// ---------------------------------------------------------------------------

/// Match identifier, derived from the participating tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    /// Deterministic `MatchId` from the participant set.
    ///
    /// Ticket order does not matter: the ids are sorted before hashing, so
    /// every worker that assembles the same group derives the same id.
    #[must_use]
    pub fn deterministic(ticket_ids: &[TicketId]) -> Self {
        let mut sorted = ticket_ids.to_vec();
        sorted.sort();
        let mut hasher = Sha256::new();
        hasher.update(b"lobbymatch:match_id:v1:");
        hasher.update((sorted.len() as u64).to_le_bytes());
        for id in &sorted {
            hasher.update(id.0.as_bytes());
        }
        Self(digest_to_uuid(hasher))
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "match:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Identifier of a published event. Used as the bus message id for dedupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Deterministic `EventId` from the event kind and its subject.
    #[must_use]
    pub fn deterministic(kind: &str, subject: &Uuid) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"lobbymatch:event_id:v1:");
        hasher.update(kind.as_bytes());
        hasher.update(subject.as_bytes());
        Self(digest_to_uuid(hasher))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RequesterRef
// ---------------------------------------------------------------------------

/// Opaque reference to whoever submitted a ticket. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequesterRef(pub String);

impl RequesterRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GameMode / Region / ShardKey
// ---------------------------------------------------------------------------

/// A queue mode (e.g. `casual`, `rank`). Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct GameMode(String);

impl GameMode {
    /// Normalize a mode name: trimmed, lowercase.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deployment region (e.g. `eu-west`). Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Region(String);

impl Region {
    /// Normalize a region name: trimmed, lowercase.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition of the ticket pool: one shard per (mode, region).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ShardKey {
    pub mode: GameMode,
    pub region: Region,
}

impl ShardKey {
    #[must_use]
    pub fn new(mode: &str, region: &str) -> Self {
        Self {
            mode: GameMode::new(mode),
            region: Region::new(region),
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.region)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_uniqueness() {
        let a = TicketId::new();
        let b = TicketId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ticket_id_ordering() {
        let a = TicketId::new();
        let b = TicketId::new();
        assert!(a < b);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn ticket_id_timestamp_extraction() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = TicketId::new();
        let after = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = id.timestamp_ms();
        assert!(
            ts >= before && ts <= after,
            "ts={ts}, before={before}, after={after}"
        );
    }

    #[test]
    fn ticket_id_parse_display() {
        let id = TicketId::new();
        assert_eq!(TicketId::parse(&id.to_string()).unwrap(), id);
        assert!(TicketId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn match_id_ignores_ticket_order() {
        let a = TicketId::from_bytes([1; 16]);
        let b = TicketId::from_bytes([2; 16]);
        let c = TicketId::from_bytes([3; 16]);
        assert_eq!(
            MatchId::deterministic(&[a, b, c]),
            MatchId::deterministic(&[c, a, b])
        );
        assert_ne!(
            MatchId::deterministic(&[a, b]),
            MatchId::deterministic(&[a, c])
        );
    }

    #[test]
    fn event_id_depends_on_kind() {
        let subject = Uuid::from_bytes([7; 16]);
        assert_eq!(
            EventId::deterministic("TICKET_EXPIRED", &subject),
            EventId::deterministic("TICKET_EXPIRED", &subject)
        );
        assert_ne!(
            EventId::deterministic("TICKET_EXPIRED", &subject),
            EventId::deterministic("TICKET_CANCELLED", &subject)
        );
    }

    #[test]
    fn shard_key_normalizes() {
        let key = ShardKey::new("  Casual ", "EU-West");
        assert_eq!(key.mode.as_str(), "casual");
        assert_eq!(key.region.as_str(), "eu-west");
        assert_eq!(key.to_string(), "casual/eu-west");
        assert_eq!(key, ShardKey::new("casual", "eu-west"));
    }
}
