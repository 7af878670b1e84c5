//! # lobbymatch-delivery
//!
//! The **delivery plane**: announces engine events to downstream
//! subscribers over a message bus, at least once.
//!
//! - [`MessageBus`]: transport contract; [`InMemoryBus`] for single-process use
//! - [`EventPublisher`]: one inline attempt, then outbox retry with
//!   exponential backoff and jitter ([`RetryPolicy`])
//! - [`DeadLetterLog`]: where events go once attempts are exhausted
//! - [`DeliveryLedger`]: per-event delivery state; an id pending or
//!   delivered is not sent again
//! - [`EventSink`]: the narrow interface ingress and the engine emit through
//!
//! Delivery failures never roll back formation.

pub mod bus;
pub mod dead_letter;
pub mod ledger;
pub mod publisher;
pub mod retry;

pub use bus::{InMemoryBus, MessageBus, PublishedMessage};
pub use dead_letter::{DeadLetter, DeadLetterLog};
pub use ledger::{DeliveryLedger, DeliveryState};
pub use publisher::{DeliveryStatus, EventPublisher, EventSink, RetryReport};
pub use retry::RetryPolicy;
