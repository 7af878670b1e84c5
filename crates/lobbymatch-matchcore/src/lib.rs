//! # lobbymatch-matchcore
//!
//! **Pure deterministic grouping for LobbyMatch.**
//!
//! MatchCore is the compute plane: it takes one shard's candidate tickets
//! and proposes disjoint groups. It has:
//!
//! - **Zero side effects**: no store access, no claims, no events
//! - **Deterministic output**: same candidates and clock -> same proposals
//! - **Age-widened windows**: a pure function of wait time, never stored
//! - **Fairness**: the oldest ticket anchors first; ties go to the closer rating

pub mod determinism;
pub mod grouping;
pub mod window;

pub use determinism::{compute_pass_digest, pass_digest_hex};
pub use grouping::{ProposedGroup, form_groups};
pub use window::{accepts, mutually_accept, search_window, ticket_window};
