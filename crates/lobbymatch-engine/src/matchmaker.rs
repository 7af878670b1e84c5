//! The assembled engine.
//!
//! [`Matchmaker`] wires one store, one bus, and one clock into intake,
//! pool, formation, supervision, and delivery. Several `Matchmaker`s may
//! share a store: they cooperate only through its conditional writes.

use std::sync::Arc;

use lobbymatch_delivery::{DeadLetter, DeadLetterLog, EventPublisher, MessageBus};
use lobbymatch_ingress::{CancelOutcome, PoolManager, SubmitOutcome, TicketIntake, TicketStatus};
use lobbymatch_store::{
    HealthStatus, SharedStateStore, SingleKeyStore, StoreHealth, TicketRepository,
    TwoPhaseClaimStore,
};
use lobbymatch_types::{
    Clock, Match, MatchId, MatchmakingConfig, Result, ShardKey, TicketId, TicketRequest,
};

use crate::formation::{MatchFormationEngine, TickReport};
use crate::runtime::MatchmakingRuntime;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::supervisor::{SupervisorReport, TimeoutSupervisor};

pub struct Matchmaker {
    config: Arc<MatchmakingConfig>,
    repo: TicketRepository,
    pool: Arc<PoolManager>,
    health: Arc<StoreHealth>,
    publisher: Arc<EventPublisher>,
    intake: TicketIntake,
    engine: Arc<MatchFormationEngine>,
    supervisor: Arc<TimeoutSupervisor>,
    stats: Arc<EngineStats>,
    clock: Arc<dyn Clock>,
}

impl Matchmaker {
    /// Validate `config` and assemble an engine over `store` and `bus`.
    ///
    /// Dead letters are persisted to `store` as well as kept in memory.
    pub fn new(
        config: MatchmakingConfig,
        store: Arc<dyn SharedStateStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let repo = TicketRepository::new(store.clone());
        let pool = PoolManager::new();
        let health = Arc::new(StoreHealth::new(clock.clone(), config.store_outage_ceiling()));
        let stats = Arc::new(EngineStats::new());
        let publisher = Arc::new(EventPublisher::new(
            bus,
            &config.publisher,
            clock.clone(),
            DeadLetterLog::with_store(store),
        ));

        let intake = TicketIntake::new(
            config.clone(),
            repo.clone(),
            pool.clone(),
            publisher.clone(),
            health.clone(),
            clock.clone(),
        );
        let engine = Arc::new(MatchFormationEngine::new(
            config.clone(),
            repo.clone(),
            pool.clone(),
            publisher.clone(),
            health.clone(),
            stats.clone(),
            clock.clone(),
        ));
        let supervisor = Arc::new(TimeoutSupervisor::new(
            config.clone(),
            repo.clone(),
            pool.clone(),
            publisher.clone(),
            health.clone(),
            stats.clone(),
            clock.clone(),
        ));

        tracing::info!(
            modes = config.modes.len(),
            tick_ms = config.tick_interval_ms,
            supervisor_ms = config.supervisor_interval_ms,
            "Matchmaker assembled"
        );
        Ok(Self {
            config,
            repo,
            pool,
            health,
            publisher,
            intake,
            engine,
            supervisor,
            stats,
            clock,
        })
    }

    /// Assemble an engine over a store that only offers single-key
    /// compare-and-swap. Multi-key writes go through a
    /// [`TwoPhaseClaimStore`] leasing keys for `claim_lease_ms`.
    pub fn over_single_key_store<S: SingleKeyStore + 'static>(
        config: MatchmakingConfig,
        store: S,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Arc::new(TwoPhaseClaimStore::from_config(store, &config));
        Self::new(config, store, bus, clock)
    }

    // -----------------------------------------------------------------
    // Inbound API
    // -----------------------------------------------------------------

    pub async fn submit_ticket(&self, request: TicketRequest) -> Result<SubmitOutcome> {
        self.intake.submit(request).await
    }

    pub async fn cancel_ticket(&self, id: &TicketId, requester: &str) -> Result<CancelOutcome> {
        let outcome = self.intake.cancel(id, requester).await?;
        if outcome == CancelOutcome::Cancelled {
            self.stats.record_cancellation();
        }
        Ok(outcome)
    }

    pub async fn ticket_status(&self, id: &TicketId, requester: &str) -> Result<TicketStatus> {
        self.intake.status(id, requester).await
    }

    pub async fn load_match(&self, id: &MatchId) -> Result<Option<Match>> {
        self.repo.load_match(id).await
    }

    // -----------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------

    /// One formation pass over one shard.
    pub async fn tick_shard(&self, shard: &ShardKey) -> Result<TickReport> {
        self.engine.tick(shard).await
    }

    /// One formation pass over every shard the pool knows, in shard order.
    /// Stops at the first store failure.
    pub async fn tick_all(&self) -> Result<Vec<TickReport>> {
        let mut reports = Vec::new();
        for shard in self.pool.shard_keys().await {
            reports.push(self.engine.tick(&shard).await?);
        }
        Ok(reports)
    }

    /// One supervisor pass.
    pub async fn supervise(&self) -> SupervisorReport {
        self.supervisor.tick().await
    }

    /// Spawn the per-shard formation loops and the supervisor loop.
    pub fn start(self: &Arc<Self>) -> MatchmakingRuntime {
        MatchmakingRuntime::start(self.clone())
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    pub async fn stats(&self) -> StatsSnapshot {
        let gauges = self.pool.gauges().await;
        self.stats
            .snapshot(gauges, self.health.status(), self.clock.now())
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.publisher.dead_letters().entries().await
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub(crate) fn engine(&self) -> &Arc<MatchFormationEngine> {
        &self.engine
    }

    pub(crate) fn supervisor(&self) -> &Arc<TimeoutSupervisor> {
        &self.supervisor
    }

    pub(crate) fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }
}
