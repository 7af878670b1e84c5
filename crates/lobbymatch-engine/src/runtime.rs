//! Tick runtime.
//!
//! ```text
//!            ┌──────────────┐  new shard   ┌───────────────────┐
//!            │ coordinator  ├─────────────▶│ shard loop (×N)   │ formation tick
//!            └──────┬───────┘              └───────────────────┘
//!                   │ spawn
//!                   ▼
//!            ┌──────────────┐
//!            │ supervisor   │ expiry, orphan release, outbox retry
//!            └──────────────┘
//! ```
//!
//! Each shard has exactly one loop, and the loop awaits its own tick before
//! the next, so a shard's ticks never overlap. Missed ticks are skipped,
//! not bunched. Shards are discovered from the pool as tickets arrive.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lobbymatch_delivery::RetryReport;
use lobbymatch_types::ShardKey;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};

use crate::formation::MatchFormationEngine;
use crate::matchmaker::Matchmaker;
use crate::supervisor::TimeoutSupervisor;

/// Handle to the running loops.
pub struct MatchmakingRuntime {
    matchmaker: Arc<Matchmaker>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl MatchmakingRuntime {
    pub(crate) fn start(matchmaker: Arc<Matchmaker>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();

        tasks.spawn(run_supervisor(
            matchmaker.supervisor().clone(),
            matchmaker.config().supervisor_interval(),
            shutdown.subscribe(),
        ));
        tasks.spawn(run_coordinator(matchmaker.clone(), shutdown.subscribe()));

        tracing::info!("Matchmaking runtime started");
        Self {
            matchmaker,
            shutdown,
            tasks,
        }
    }

    /// Stop every loop, wait for in-flight ticks, then flush the outbox once.
    pub async fn shutdown(mut self) -> RetryReport {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Runtime task ended abnormally");
            }
        }
        let flushed = self.matchmaker.publisher().flush().await;
        tracing::info!(
            delivered = flushed.delivered,
            remaining = flushed.remaining,
            "Matchmaking runtime stopped"
        );
        flushed
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Spawns a formation loop for every shard as it appears in the pool.
async fn run_coordinator(matchmaker: Arc<Matchmaker>, mut shutdown: watch::Receiver<bool>) {
    let period = matchmaker.config().tick_interval();
    let mut discovery = ticker(period);
    let mut running: HashSet<ShardKey> = HashSet::new();
    let mut shards = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = discovery.tick() => {
                for shard in matchmaker.pool().shard_keys().await {
                    if running.insert(shard.clone()) {
                        tracing::info!(shard = %shard, "Starting shard formation loop");
                        shards.spawn(run_shard(
                            matchmaker.engine().clone(),
                            shard,
                            period,
                            shutdown.clone(),
                        ));
                    }
                }
            }
        }
    }

    while let Some(joined) = shards.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Shard loop ended abnormally");
        }
    }
}

async fn run_shard(
    engine: Arc<MatchFormationEngine>,
    shard: ShardKey,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {
                match engine.tick(&shard).await {
                    Ok(report) if !report.formed.is_empty() => {
                        tracing::debug!(shard = %shard, formed = report.formed.len(), "Tick formed matches");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(shard = %shard, error = %e, "Formation tick failed");
                    }
                }
            }
        }
    }
    tracing::debug!(shard = %shard, "Shard formation loop stopped");
}

async fn run_supervisor(
    supervisor: Arc<TimeoutSupervisor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {
                let report = supervisor.tick().await;
                if report.expired + report.released > 0 || report.publish.dead_lettered > 0 {
                    tracing::info!(
                        expired = report.expired,
                        released = report.released,
                        dead_lettered = report.publish.dead_lettered,
                        "Supervisor pass"
                    );
                }
            }
        }
    }
    tracing::debug!("Supervisor loop stopped");
}
