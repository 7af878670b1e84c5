//! # lobbymatch-engine
//!
//! The **formation plane** of LobbyMatch, plus the assembled engine.
//!
//! - [`MatchFormationEngine`]: per-shard scan, deterministic grouping,
//!   atomic multi-claim, and match commit
//! - [`TimeoutSupervisor`]: expiry, orphaned-claim release, pool
//!   reconciliation, and outbox retry
//! - [`MatchmakingRuntime`]: one tokio task per shard plus the supervisor
//! - [`Matchmaker`]: wires store, bus, and clock into every plane
//! - [`EngineStats`]: queue depth, wait, and outcome counters
//! - [`telemetry`]: `tracing-subscriber` installation
//!
//! ## Lifecycle
//!
//! ```text
//! submit ──▶ PENDING ──claim──▶ CLAIMED ──commit──▶ MATCHED ──▶ MatchFormed
//!              │  ▲                │
//!              │  └────release─────┘ (commit rejected, or grace elapsed)
//!              ├──max wait──▶ EXPIRED ──▶ TicketExpired
//!              └──cancel────▶ CANCELLED ──▶ TicketCancelled
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lobbymatch_delivery::InMemoryBus;
//! use lobbymatch_engine::Matchmaker;
//! use lobbymatch_store::InMemoryStore;
//! use lobbymatch_types::{MatchmakingConfig, SystemClock, TicketRequest};
//!
//! # async fn run() -> lobbymatch_types::Result<()> {
//! let matchmaker = Arc::new(Matchmaker::new(
//!     MatchmakingConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryBus::new()),
//!     Arc::new(SystemClock),
//! )?);
//! let runtime = matchmaker.start();
//! let outcome = matchmaker
//!     .submit_ticket(TicketRequest::new("casual", "eu-west", 1, None, "player-1"))
//!     .await?;
//! println!("queued {}", outcome.ticket_id());
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod formation;
pub mod matchmaker;
pub mod runtime;
pub mod stats;
pub mod supervisor;
pub mod telemetry;

pub use formation::{MatchFormationEngine, SkipReason, TickReport};
pub use matchmaker::Matchmaker;
pub use runtime::MatchmakingRuntime;
pub use stats::{EngineStats, ShardStats, StatsSnapshot};
pub use supervisor::{SupervisorReport, TimeoutSupervisor};
pub use telemetry::{LogFormat, init_tracing};
