//! # lobbymatch-types
//!
//! Shared types, errors, and configuration for the **LobbyMatch** engine.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`TicketId`], [`MatchId`], [`EventId`], [`RequesterRef`], [`GameMode`], [`Region`], [`ShardKey`]
//! - **Ticket model**: [`Ticket`], [`TicketState`], [`TicketRequest`]
//! - **Match model**: [`Match`]
//! - **Events**: [`MatchmakingEvent`], [`EventEnvelope`], [`EventType`]
//! - **Configuration**: [`MatchmakingConfig`], [`ModeConfig`], [`WindowPolicy`], [`PublisherConfig`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Errors**: [`LobbymatchError`] with `LM_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod match_record;
pub mod ticket;

// Re-export all primary types at crate root for ergonomic imports:
//   use lobbymatch_types::{Ticket, TicketState, Match, ...};

pub use clock::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use match_record::*;
pub use ticket::*;

// Constants are accessed via `lobbymatch_types::constants::FOO`
// (not re-exported to avoid name collisions).
