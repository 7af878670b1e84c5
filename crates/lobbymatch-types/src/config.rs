//! Configuration types for the LobbyMatch engine.
//!
//! Loaded from TOML via [`MatchmakingConfig::from_toml_str`]. Every field
//! has a default, so an empty document yields a working two-mode setup.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{GameMode, LobbymatchError, Region, Result, constants};

// ---------------------------------------------------------------------------
// Window policy
// ---------------------------------------------------------------------------

/// How a ticket's skill window widens with wait time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Window accepted at submission.
    pub base_window: Decimal,
    /// Added per second of waiting.
    pub growth_per_sec: Decimal,
    /// Hard cap.
    pub max_window: Decimal,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            base_window: Decimal::new(constants::DEFAULT_BASE_WINDOW, 0),
            growth_per_sec: Decimal::new(constants::DEFAULT_WINDOW_GROWTH_PER_SEC, 0),
            max_window: Decimal::new(constants::DEFAULT_MAX_WINDOW, 0),
        }
    }
}

impl WindowPolicy {
    fn validate(&self, scope: &str) -> Result<()> {
        if self.base_window.is_sign_negative() || self.growth_per_sec.is_sign_negative() {
            return Err(LobbymatchError::Configuration(format!(
                "{scope}: window values must not be negative"
            )));
        }
        if self.max_window < self.base_window {
            return Err(LobbymatchError::Configuration(format!(
                "{scope}: max_window {} is below base_window {}",
                self.max_window, self.base_window
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// Per-mode matching rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Mode name, matched case-insensitively.
    pub name: String,
    /// Participants per match. Party sizes must sum to exactly this.
    pub participants: u32,
    /// Largest party a single ticket may bring.
    pub max_party_size: u32,
    /// Overrides the global window policy for this mode.
    #[serde(default)]
    pub window: Option<WindowPolicy>,
}

impl ModeConfig {
    #[must_use]
    pub fn new(name: &str, participants: u32) -> Self {
        Self {
            name: GameMode::new(name).as_str().to_string(),
            participants,
            max_party_size: participants,
            window: None,
        }
    }

    #[must_use]
    pub fn casual() -> Self {
        Self::new("casual", 2)
    }

    #[must_use]
    pub fn rank() -> Self {
        Self::new("rank", 2)
    }

    #[must_use]
    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = Some(window);
        self
    }

    #[must_use]
    pub fn game_mode(&self) -> GameMode {
        GameMode::new(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Event delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Bus subject all events are published on.
    pub subject: String,
    /// Attempts before an event is dead-lettered.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Random jitter as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Event ids remembered to suppress duplicate enqueues.
    pub dedupe_cache_size: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            subject: constants::DEFAULT_EVENT_SUBJECT.to_string(),
            max_attempts: constants::DEFAULT_PUBLISH_MAX_ATTEMPTS,
            initial_backoff_ms: constants::DEFAULT_PUBLISH_INITIAL_BACKOFF_MS,
            max_backoff_ms: constants::DEFAULT_PUBLISH_MAX_BACKOFF_MS,
            backoff_multiplier: constants::DEFAULT_PUBLISH_BACKOFF_MULTIPLIER,
            jitter_fraction: constants::DEFAULT_PUBLISH_JITTER_FRACTION,
            dedupe_cache_size: constants::DEFAULT_DELIVERY_DEDUPE_CACHE_SIZE,
        }
    }
}

impl PublisherConfig {
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(LobbymatchError::Configuration(
                "publisher.subject must not be empty".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(LobbymatchError::Configuration(
                "publisher.max_attempts must be at least 1".into(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(LobbymatchError::Configuration(
                "publisher.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(LobbymatchError::Configuration(
                "publisher.jitter_fraction must be within 0.0..=1.0".into(),
            ));
        }
        if self.dedupe_cache_size == 0 {
            return Err(LobbymatchError::Configuration(
                "publisher.dedupe_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub modes: Vec<ModeConfig>,
    /// Empty means any region is accepted.
    pub allowed_regions: Vec<String>,
    /// Global window policy, overridable per mode.
    pub window: WindowPolicy,
    pub default_skill_rating: Decimal,
    pub min_skill_rating: Decimal,
    pub max_skill_rating: Decimal,
    pub tick_interval_ms: u64,
    pub supervisor_interval_ms: u64,
    pub max_wait_ms: u64,
    pub claim_grace_ms: u64,
    pub terminal_retention_ms: u64,
    pub store_outage_ceiling_ms: u64,
    /// Lease on each key during a two-phase claim.
    pub claim_lease_ms: u64,
    pub publisher: PublisherConfig,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            modes: vec![ModeConfig::casual(), ModeConfig::rank()],
            allowed_regions: Vec::new(),
            window: WindowPolicy::default(),
            default_skill_rating: Decimal::new(constants::DEFAULT_SKILL_RATING, 0),
            min_skill_rating: Decimal::new(constants::MIN_SKILL_RATING, 0),
            max_skill_rating: Decimal::new(constants::MAX_SKILL_RATING, 0),
            tick_interval_ms: constants::DEFAULT_TICK_INTERVAL_MS,
            supervisor_interval_ms: constants::DEFAULT_SUPERVISOR_INTERVAL_MS,
            max_wait_ms: constants::DEFAULT_MAX_WAIT_MS,
            claim_grace_ms: constants::DEFAULT_CLAIM_GRACE_MS,
            terminal_retention_ms: constants::DEFAULT_TERMINAL_RETENTION_MS,
            store_outage_ceiling_ms: constants::DEFAULT_STORE_OUTAGE_CEILING_MS,
            claim_lease_ms: constants::DEFAULT_CLAIM_LEASE_MS,
            publisher: PublisherConfig::default(),
        }
    }
}

impl MatchmakingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LobbymatchError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a mode by name, case-insensitively.
    #[must_use]
    pub fn mode(&self, name: &GameMode) -> Option<&ModeConfig> {
        self.modes.iter().find(|m| m.game_mode() == *name)
    }

    /// The effective window policy for a mode.
    #[must_use]
    pub fn window_for(&self, mode: &GameMode) -> &WindowPolicy {
        self.mode(mode)
            .and_then(|m| m.window.as_ref())
            .unwrap_or(&self.window)
    }

    /// Whether the region passes the allow-list.
    #[must_use]
    pub fn region_allowed(&self, region: &Region) -> bool {
        self.allowed_regions.is_empty()
            || self
                .allowed_regions
                .iter()
                .any(|r| Region::new(r) == *region)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    #[must_use]
    pub fn claim_grace(&self) -> Duration {
        Duration::from_millis(self.claim_grace_ms)
    }

    #[must_use]
    pub fn terminal_retention(&self) -> Duration {
        Duration::from_millis(self.terminal_retention_ms)
    }

    #[must_use]
    pub fn store_outage_ceiling(&self) -> Duration {
        Duration::from_millis(self.store_outage_ceiling_ms)
    }

    #[must_use]
    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.modes.is_empty() {
            return Err(LobbymatchError::Configuration(
                "at least one mode must be configured".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for mode in &self.modes {
            let name = mode.game_mode();
            if name.as_str().is_empty() {
                return Err(LobbymatchError::Configuration(
                    "mode name must not be empty".into(),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(LobbymatchError::Configuration(format!(
                    "duplicate mode: {name}"
                )));
            }
            if mode.participants == 0 {
                return Err(LobbymatchError::Configuration(format!(
                    "mode {name}: participants must be at least 1"
                )));
            }
            if mode.max_party_size == 0 || mode.max_party_size > mode.participants {
                return Err(LobbymatchError::Configuration(format!(
                    "mode {name}: max_party_size must be within 1..={}",
                    mode.participants
                )));
            }
            if let Some(window) = &mode.window {
                window.validate(&format!("mode {name}"))?;
            }
        }
        self.window.validate("window")?;
        if self.min_skill_rating > self.max_skill_rating {
            return Err(LobbymatchError::Configuration(
                "min_skill_rating exceeds max_skill_rating".into(),
            ));
        }
        if self.default_skill_rating < self.min_skill_rating
            || self.default_skill_rating > self.max_skill_rating
        {
            return Err(LobbymatchError::Configuration(
                "default_skill_rating is outside the accepted range".into(),
            ));
        }
        if self.tick_interval_ms == 0 || self.supervisor_interval_ms == 0 {
            return Err(LobbymatchError::Configuration(
                "tick intervals must be non-zero".into(),
            ));
        }
        if self.max_wait_ms == 0 || self.claim_grace_ms == 0 {
            return Err(LobbymatchError::Configuration(
                "max_wait_ms and claim_grace_ms must be non-zero".into(),
            ));
        }
        if self.claim_lease_ms == 0 {
            return Err(LobbymatchError::Configuration(
                "claim_lease_ms must be non-zero".into(),
            ));
        }
        self.publisher.validate()
    }
}
