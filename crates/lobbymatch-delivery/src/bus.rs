//! Message bus contract and an in-process implementation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use lobbymatch_types::{EventEnvelope, LobbymatchError, Result};
use tokio::sync::Mutex;

/// Publish/subscribe transport.
///
/// `message_id` is stable per event so brokers with server-side dedupe
/// (a `Nats-Msg-Id` style header) can drop redeliveries.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, message_id: &str, payload: &[u8]) -> Result<()>;
}

/// A message accepted by [`InMemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub message_id: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct BusLog {
    messages: Vec<PublishedMessage>,
    seen: HashSet<String>,
}

/// In-process bus that records what it accepts and dedupes by message id.
///
/// Failure injection (`fail_next`, `set_down`) simulates broker outages.
#[derive(Default)]
pub struct InMemoryBus {
    log: Mutex<BusLog>,
    fail_next: AtomicU32,
    down: AtomicBool,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` publishes.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject every publish until set back to `false`.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Accepted messages, in publish order, without duplicates.
    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.log.lock().await.messages.clone()
    }

    /// Accepted messages decoded as envelopes. Undecodable payloads are skipped.
    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.log
            .lock()
            .await
            .messages
            .iter()
            .filter_map(|m| EventEnvelope::from_json_bytes(&m.payload).ok())
            .collect()
    }

    fn rejecting(&self) -> bool {
        self.down.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, message_id: &str, payload: &[u8]) -> Result<()> {
        if self.rejecting() {
            return Err(LobbymatchError::PublishFailure {
                reason: format!("bus rejected {message_id} on {subject}"),
            });
        }
        let mut log = self.log.lock().await;
        if log.seen.insert(message_id.to_string()) {
            log.messages.push(PublishedMessage {
                subject: subject.to_string(),
                message_id: message_id.to_string(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}
