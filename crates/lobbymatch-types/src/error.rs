//! Error types for the LobbyMatch engine.
//!
//! All errors use the `LM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Request errors (caller mistakes, never retried)
//! - 2xx: Ticket state errors
//! - 3xx: Shared state store errors
//! - 5xx: Delivery errors
//! - 9xx: General / internal errors
//!
//! A duplicate submission is not an error: intake reports it as a
//! successful `DuplicateActive` outcome carrying the existing ticket id.

use thiserror::Error;

use crate::{TicketId, TicketState};

/// Central error enum for all LobbyMatch operations.
#[derive(Debug, Error)]
pub enum LobbymatchError {
    // =================================================================
    // Request Errors (1xx)
    // =================================================================
    /// The request is missing fields or has out-of-range values.
    #[error("LM_ERR_100: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The requested mode is not configured.
    #[error("LM_ERR_101: Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// The requested region is not allowed.
    #[error("LM_ERR_102: Unsupported region: {0}")]
    UnsupportedRegion(String),

    // =================================================================
    // Ticket Errors (2xx)
    // =================================================================
    /// No ticket with this id exists (or it has aged out of retention).
    #[error("LM_ERR_200: Ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// The ticket belongs to a different requester.
    #[error("LM_ERR_201: Ticket {0} belongs to another requester")]
    TicketAccessDenied(TicketId),

    /// Cancellation arrived after the ticket was claimed for a match.
    #[error("LM_ERR_202: Ticket already matched: {0}")]
    AlreadyMatched(TicketId),

    /// A state transition outside the ticket lifecycle was attempted.
    #[error("LM_ERR_203: Invalid ticket transition: {from} -> {to}")]
    InvalidTransition { from: TicketState, to: TicketState },

    // =================================================================
    // Store Errors (3xx)
    // =================================================================
    /// The shared state store could not be reached. Transient.
    #[error("LM_ERR_300: Shared state store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// A record in the store could not be decoded.
    #[error("LM_ERR_301: Corrupt store record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// The store has been unreachable past the configured ceiling.
    /// New submissions and formation attempts are refused.
    #[error("LM_ERR_302: Engine degraded: store unreachable for {outage_ms}ms")]
    EngineDegraded { outage_ms: u64 },

    // =================================================================
    // Delivery Errors (5xx)
    // =================================================================
    /// The message bus rejected or failed to accept an event.
    #[error("LM_ERR_500: Publish failed: {reason}")]
    PublishFailure { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("LM_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("LM_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("LM_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl LobbymatchError {
    /// Whether the operation may succeed if retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::PublishFailure { .. }
        )
    }

    /// Shorthand for a store outage with the given reason.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for an invalid request with the given reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LobbymatchError>;

impl From<serde_json::Error> for LobbymatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = LobbymatchError::TicketNotFound(TicketId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("LM_ERR_200"), "Got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let err = LobbymatchError::InvalidTransition {
            from: TicketState::Matched,
            to: TicketState::Pending,
        };
        let msg = format!("{err}");
        assert!(msg.contains("LM_ERR_203"));
        assert!(msg.contains("MATCHED"));
        assert!(msg.contains("PENDING"));
    }

    #[test]
    fn transient_classification() {
        assert!(LobbymatchError::store_unavailable("down").is_transient());
        assert!(
            LobbymatchError::PublishFailure {
                reason: "bus down".into()
            }
            .is_transient()
        );
        assert!(!LobbymatchError::invalid("party_size").is_transient());
        assert!(!LobbymatchError::AlreadyMatched(TicketId::new()).is_transient());
    }

    #[test]
    fn all_errors_have_lm_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(LobbymatchError::UnsupportedMode("arena".into())),
            Box::new(LobbymatchError::EngineDegraded { outage_ms: 30_000 }),
            Box::new(LobbymatchError::PublishFailure {
                reason: "bus down".into(),
            }),
            Box::new(LobbymatchError::Internal("test".into())),
            Box::new(LobbymatchError::CorruptRecord {
                key: "ticket:x".into(),
                reason: "eof".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("LM_ERR_"),
                "Error missing LM_ERR_ prefix: {msg}"
            );
        }
    }
}
