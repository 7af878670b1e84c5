//! # lobbymatch-store
//!
//! The **Shared State Store** plane: the durable source of truth for ticket
//! existence and claim locks.
//!
//! - [`SharedStateStore`]: put / get / all-or-nothing multi-key conditional
//!   write / TTL expiry / prefix scan
//! - [`InMemoryStore`]: deterministic in-process implementation
//! - [`TwoPhaseClaimStore`]: multi-key writes over a single-key CAS store,
//!   via bounded leases and rollback
//! - [`TicketRepository`]: typed ticket and match records; every state
//!   transition is one conditional write
//! - [`StoreHealth`]: outage breaker that degrades the engine past a ceiling
//!
//! The in-process pool view held by ingress is a cache. Claims are only
//! trusted once this store has accepted them.

pub mod contract;
#[cfg(any(test, feature = "test-helpers"))]
pub mod flaky;
pub mod health;
pub mod memory;
pub mod repository;
pub mod two_phase;

pub use contract::{CasOp, Mutation, Precondition, SharedStateStore, SingleKeyStore, StoreEntry};
#[cfg(any(test, feature = "test-helpers"))]
pub use flaky::{FlakyCasStore, FlakyStore};
pub use health::{HealthStatus, StoreHealth};
pub use memory::InMemoryStore;
pub use repository::{ClaimOutcome, StoredTicket, TicketRepository};
pub use two_phase::TwoPhaseClaimStore;
