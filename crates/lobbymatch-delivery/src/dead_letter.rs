//! Dead-letter records for events that exhausted their publish attempts.
//!
//! Dead letters are kept in memory for inspection and, when a store is
//! attached, written under `deadletter:{event_id}` for external recovery.
//! Recording a dead letter never fails the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lobbymatch_store::{SharedStateStore, StoreEntry};
use lobbymatch_types::{EventEnvelope, EventId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const DEAD_LETTER_PREFIX: &str = "deadletter:";
const DEAD_LETTER_TAG: &str = "DEAD";

/// An event that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.envelope.event_id
    }
}

/// Append-only dead-letter log.
#[derive(Default)]
pub struct DeadLetterLog {
    entries: Mutex<Vec<DeadLetter>>,
    store: Option<Arc<dyn SharedStateStore>>,
}

impl DeadLetterLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also persist dead letters to the shared store.
    #[must_use]
    pub fn with_store(store: Arc<dyn SharedStateStore>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store: Some(store),
        }
    }

    pub async fn record(&self, letter: DeadLetter) {
        tracing::error!(
            event_id = %letter.event_id(),
            event_type = %letter.envelope.event_type,
            attempts = letter.attempts,
            error = %letter.last_error,
            "Event dead-lettered after exhausting publish attempts"
        );
        if let Some(store) = &self.store {
            let key = format!("{DEAD_LETTER_PREFIX}{}", letter.event_id());
            match serde_json::to_vec(&letter) {
                Ok(body) => {
                    if let Err(e) = store.put(&key, StoreEntry::new(DEAD_LETTER_TAG, body)).await {
                        tracing::error!(key = %key, error = %e, "Failed to persist dead letter");
                    }
                }
                Err(e) => tracing::error!(key = %key, error = %e, "Failed to encode dead letter"),
            }
        }
        self.entries.lock().await.push(letter);
    }

    pub async fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
