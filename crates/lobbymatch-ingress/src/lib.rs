//! # lobbymatch-ingress
//!
//! **Intake plane**: turns requests into tickets and keeps the in-process
//! pool of `Pending` tickets that formation scans.
//!
//! ## Architecture
//!
//! 1. **TicketIntake**: validates and normalizes requests, enforces one
//!    active ticket per requester per shard, handles cancel and status
//! 2. **PoolManager**: per-shard ordered cache of `Pending` tickets,
//!    realigned with the store by the supervisor
//!
//! ## Ticket Flow
//!
//! ```text
//! submit → TicketIntake.normalize() → TicketRepository.insert_new()
//!        → PoolManager.enqueue() → (formation scans)
//! ```
//!
//! The store is authoritative. The pool only ever proposes candidates.

pub mod intake;
pub mod pool;

pub use intake::{CancelOutcome, SubmitOutcome, TicketIntake, TicketStatus};
pub use pool::{PoolManager, PoolMark, PoolScan, ReconcileReport, ShardGauge};
