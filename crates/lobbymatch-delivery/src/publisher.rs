//! At-least-once event publisher.
//!
//! `publish` makes one inline attempt. A failed event moves to the outbox
//! and is retried by [`EventPublisher::retry_due`] on the supervisor tick
//! with exponential backoff. Once `max_attempts` is spent it becomes a
//! dead letter. Publish failures never propagate to the caller: a
//! committed match stands whether or not its announcement got through.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lobbymatch_types::{
    Clock, EventEnvelope, EventId, MatchmakingEvent, PublisherConfig, Result,
};
use tokio::sync::Mutex;

use crate::bus::MessageBus;
use crate::dead_letter::{DeadLetter, DeadLetterLog};
use crate::ledger::{DeliveryLedger, DeliveryState};
use crate::retry::RetryPolicy;

/// What happened to an event handed to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Accepted by the bus on the first attempt.
    Delivered,
    /// First attempt failed; queued for retry.
    Queued { attempts: u32 },
    /// The same event id is already in the outbox or was delivered;
    /// nothing was sent.
    Duplicate,
    /// Failed and no attempts remain.
    DeadLettered,
}

/// Outcome of one outbox retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Entries still waiting (not yet due, or requeued).
    pub remaining: usize,
}

/// Anything that accepts engine events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: MatchmakingEvent) -> Result<DeliveryStatus>;
}

struct OutboxEntry {
    envelope: EventEnvelope,
    payload: Vec<u8>,
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
    last_error: String,
}

/// Publishes engine events to a [`MessageBus`] with retry and dead-lettering.
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    subject: String,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    ledger: Mutex<DeliveryLedger>,
    outbox: Mutex<VecDeque<OutboxEntry>>,
    dead_letters: DeadLetterLog,
}

impl EventPublisher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        config: &PublisherConfig,
        clock: Arc<dyn Clock>,
        dead_letters: DeadLetterLog,
    ) -> Self {
        Self {
            bus,
            subject: config.subject.clone(),
            policy: RetryPolicy::from_config(config),
            clock,
            ledger: Mutex::new(DeliveryLedger::new(config.dedupe_cache_size)),
            outbox: Mutex::new(VecDeque::new()),
            dead_letters,
        }
    }

    pub fn dead_letters(&self) -> &DeadLetterLog {
        &self.dead_letters
    }

    pub async fn outbox_len(&self) -> usize {
        self.outbox.lock().await.len()
    }

    /// Where the event stands, if it was handed over and not yet evicted.
    pub async fn delivery_state(&self, event_id: &EventId) -> Option<DeliveryState> {
        self.ledger.lock().await.state(event_id)
    }

    /// Hand an event to the bus.
    ///
    /// Errors only if the event cannot be serialized; bus failures are
    /// reported through [`DeliveryStatus`].
    pub async fn publish(&self, event: &MatchmakingEvent) -> Result<DeliveryStatus> {
        let envelope = EventEnvelope::from_event(event);
        let payload = envelope.to_json_bytes()?;
        if !self.ledger.lock().await.begin(envelope.event_id) {
            tracing::debug!(event_id = %envelope.event_id, "Duplicate event suppressed");
            return Ok(DeliveryStatus::Duplicate);
        }

        match self.send(&envelope, &payload).await {
            Ok(()) => {
                self.ledger.lock().await.delivered(envelope.event_id);
                tracing::debug!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "Event published"
                );
                Ok(DeliveryStatus::Delivered)
            }
            Err(e) => {
                let entry = OutboxEntry {
                    envelope,
                    payload,
                    attempts: 1,
                    next_attempt_at: self.clock.now(),
                    last_error: e.to_string(),
                };
                Ok(self.after_failure(entry).await)
            }
        }
    }

    /// Retry every outbox entry whose backoff has elapsed.
    pub async fn retry_due(&self) -> RetryReport {
        let now = self.clock.now();
        self.retry_where(|entry| entry.next_attempt_at <= now).await
    }

    /// Retry every outbox entry now, ignoring backoff. Used on shutdown.
    pub async fn flush(&self) -> RetryReport {
        self.retry_where(|_| true).await
    }

    async fn retry_where(&self, due: impl Fn(&OutboxEntry) -> bool) -> RetryReport {
        let ready: Vec<OutboxEntry> = {
            let mut outbox = self.outbox.lock().await;
            let (ready, waiting): (VecDeque<_>, VecDeque<_>) = outbox.drain(..).partition(|e| due(e));
            *outbox = waiting;
            ready.into()
        };

        let mut report = RetryReport::default();
        for mut entry in ready {
            match self.send(&entry.envelope, &entry.payload).await {
                Ok(()) => {
                    self.ledger.lock().await.delivered(entry.envelope.event_id);
                    tracing::info!(
                        event_id = %entry.envelope.event_id,
                        attempts = entry.attempts + 1,
                        "Event delivered on retry"
                    );
                    report.delivered += 1;
                }
                Err(e) => {
                    entry.attempts += 1;
                    entry.last_error = e.to_string();
                    match self.after_failure(entry).await {
                        DeliveryStatus::DeadLettered => report.dead_lettered += 1,
                        _ => report.requeued += 1,
                    }
                }
            }
        }
        report.remaining = self.outbox.lock().await.len();
        report
    }

    async fn send(&self, envelope: &EventEnvelope, payload: &[u8]) -> Result<()> {
        self.bus
            .publish(&self.subject, &envelope.event_id.to_string(), payload)
            .await
    }

    /// Requeue with backoff, or dead-letter when attempts are spent.
    async fn after_failure(&self, mut entry: OutboxEntry) -> DeliveryStatus {
        if !self.policy.allows_retry(entry.attempts) {
            self.ledger.lock().await.dead_lettered(entry.envelope.event_id);
            self.dead_letters
                .record(DeadLetter {
                    envelope: entry.envelope,
                    attempts: entry.attempts,
                    last_error: entry.last_error,
                    dead_lettered_at: self.clock.now(),
                })
                .await;
            return DeliveryStatus::DeadLettered;
        }

        let delay = self.policy.delay_for(entry.attempts);
        entry.next_attempt_at = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        tracing::warn!(
            event_id = %entry.envelope.event_id,
            attempts = entry.attempts,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %entry.last_error,
            "Publish failed; will retry"
        );
        let attempts = entry.attempts;
        self.ledger
            .lock()
            .await
            .failed_attempt(entry.envelope.event_id, attempts);
        self.outbox.lock().await.push_back(entry);
        DeliveryStatus::Queued { attempts }
    }
}

#[async_trait]
impl EventSink for EventPublisher {
    async fn emit(&self, event: MatchmakingEvent) -> Result<DeliveryStatus> {
        self.publish(&event).await
    }
}
