//! System-wide constants for the LobbyMatch engine.

/// Default formation tick interval per shard in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;

/// Default supervisor tick interval in milliseconds.
pub const DEFAULT_SUPERVISOR_INTERVAL_MS: u64 = 1000;

/// Skill window a freshly submitted ticket accepts.
pub const DEFAULT_BASE_WINDOW: i64 = 50;

/// Window growth per second of waiting.
pub const DEFAULT_WINDOW_GROWTH_PER_SEC: i64 = 5;

/// Upper bound on the search window.
pub const DEFAULT_MAX_WINDOW: i64 = 500;

/// Skill rating assumed when a request does not carry one.
pub const DEFAULT_SKILL_RATING: i64 = 1000;

/// Lowest accepted skill rating.
pub const MIN_SKILL_RATING: i64 = 0;

/// Highest accepted skill rating.
pub const MAX_SKILL_RATING: i64 = 10_000;

/// Maximum time a ticket may wait in the pool before it expires.
pub const DEFAULT_MAX_WAIT_MS: u64 = 120_000;

/// Grace period after which an orphaned claim is force-released.
pub const DEFAULT_CLAIM_GRACE_MS: u64 = 5_000;

/// How long terminal ticket records stay readable in the store.
pub const DEFAULT_TERMINAL_RETENTION_MS: u64 = 600_000;

/// Store outage duration after which the engine degrades.
pub const DEFAULT_STORE_OUTAGE_CEILING_MS: u64 = 30_000;

/// Default number of publish attempts before dead-lettering.
pub const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 5;

/// Initial publish retry backoff in milliseconds.
pub const DEFAULT_PUBLISH_INITIAL_BACKOFF_MS: u64 = 100;

/// Cap on publish retry backoff in milliseconds.
pub const DEFAULT_PUBLISH_MAX_BACKOFF_MS: u64 = 10_000;

/// Multiplier applied to the backoff after each failed attempt.
pub const DEFAULT_PUBLISH_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Fraction of the delay added as random jitter.
pub const DEFAULT_PUBLISH_JITTER_FRACTION: f64 = 0.2;

/// Number of recently published event ids remembered for dedupe.
pub const DEFAULT_DELIVERY_DEDUPE_CACHE_SIZE: usize = 100_000;

/// Default message bus subject for matchmaking events.
pub const DEFAULT_EVENT_SUBJECT: &str = "matchmaking.events";

/// Lease held on a key during a two-phase claim, in milliseconds.
pub const DEFAULT_CLAIM_LEASE_MS: u64 = 2_000;

/// Maximum length of an opaque requester reference.
pub const MAX_REQUESTER_REF_LEN: usize = 128;

/// Maximum length of a region name.
pub const MAX_REGION_LEN: usize = 64;
