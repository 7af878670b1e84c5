//! Pool manager: the in-process working set of `Pending` tickets.
//!
//! One shard per (mode, region), created lazily on the first ticket and
//! never destroyed. Each shard keeps its tickets ordered by
//! (`submitted_at`, id), so scans yield the longest-waiting tickets first.
//!
//! The pool is a cache of the store. Scans return *candidates*, never
//! confirmed availability: a ticket may have been claimed, cancelled, or
//! expired elsewhere since it was cached. [`PoolManager::reconcile`]
//! realigns the cache with a store snapshot, judged against a
//! [`PoolMark`] taken before the snapshot was read.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lobbymatch_types::{LobbymatchError, Result, ShardKey, Ticket, TicketId};
use tokio::sync::RwLock;

type PoolKey = (DateTime<Utc>, TicketId);

fn pool_key(ticket: &Ticket) -> PoolKey {
    (ticket.submitted_at, ticket.id)
}

#[derive(Default)]
struct PoolShard {
    tickets: BTreeMap<PoolKey, Ticket>,
    /// Bumped on every membership change; a scan records the value it saw.
    generation: u64,
}

/// Where a cached ticket lives, and the pool epoch it entered at.
struct Slot {
    shard: ShardKey,
    key: PoolKey,
    entered: u64,
}

#[derive(Default)]
struct PoolInner {
    shards: HashMap<ShardKey, PoolShard>,
    locator: HashMap<TicketId, Slot>,
    /// Bumped on every insert and removal across all shards.
    epoch: u64,
    /// Epoch each ticket last left the pool at. Pruned by `reconcile`.
    departed: HashMap<TicketId, u64>,
}

impl PoolInner {
    fn insert(&mut self, ticket: Ticket) {
        self.epoch += 1;
        let key = pool_key(&ticket);
        self.locator.insert(
            ticket.id,
            Slot {
                shard: ticket.shard.clone(),
                key,
                entered: self.epoch,
            },
        );
        self.departed.remove(&ticket.id);
        let shard = self.shards.entry(ticket.shard.clone()).or_default();
        shard.tickets.insert(key, ticket);
        shard.generation += 1;
    }

    fn remove(&mut self, id: &TicketId) -> Option<Ticket> {
        let slot = self.locator.remove(id)?;
        self.epoch += 1;
        self.departed.insert(*id, self.epoch);
        let shard = self.shards.get_mut(&slot.shard)?;
        let removed = shard.tickets.remove(&slot.key);
        shard.generation += 1;
        removed
    }

    fn cached(&self, id: &TicketId) -> Option<&Ticket> {
        let slot = self.locator.get(id)?;
        self.shards.get(&slot.shard)?.tickets.get(&slot.key)
    }
}

/// Pool epoch observed before a store snapshot is read.
///
/// Pool changes after the mark are newer than anything the snapshot can
/// show, so reconciliation leaves them alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PoolMark(u64);

/// A restartable, lazily filtered view of one shard at scan time.
pub struct PoolScan {
    shard: ShardKey,
    generation: u64,
    tickets: Vec<Ticket>,
    predicate: Box<dyn Fn(&Ticket) -> bool + Send + Sync>,
}

impl PoolScan {
    /// Oldest first. Each call starts again from the oldest ticket.
    pub fn iter(&self) -> impl Iterator<Item = &Ticket> + '_ {
        self.tickets.iter().filter(|t| (self.predicate)(t))
    }

    /// Matching tickets, collected.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Ticket> {
        self.iter().cloned().collect()
    }

    #[must_use]
    pub fn shard(&self) -> &ShardKey {
        &self.shard
    }

    /// Shard generation the snapshot was taken at.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tickets in the snapshot before filtering.
    #[must_use]
    pub fn snapshot_len(&self) -> usize {
        self.tickets.len()
    }
}

/// Queue gauge for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGauge {
    pub shard: ShardKey,
    pub depth: usize,
    pub oldest_submitted_at: Option<DateTime<Utc>>,
}

/// Result of realigning the pool with the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub refreshed: usize,
    pub dropped: usize,
    /// Pending in the snapshot but taken from the pool after the mark.
    pub skipped: usize,
}

impl ReconcileReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.inserted + self.refreshed + self.dropped > 0
    }
}

/// Per-shard ordered working sets of `Pending` tickets.
#[derive(Default)]
pub struct PoolManager {
    inner: RwLock<PoolInner>,
}

impl PoolManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a `Pending` ticket to its shard. Re-enqueueing a cached ticket
    /// replaces the cached copy.
    pub async fn enqueue(&self, ticket: Ticket) -> Result<()> {
        if !ticket.is_pending() {
            return Err(LobbymatchError::invalid(format!(
                "only pending tickets enter the pool; {} is {}",
                ticket.id, ticket.state
            )));
        }
        let mut inner = self.inner.write().await;
        inner.remove(&ticket.id);
        tracing::debug!(ticket = %ticket.id, shard = %ticket.shard, "Ticket enqueued");
        inner.insert(ticket);
        Ok(())
    }

    /// Remove a ticket. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &TicketId) -> Option<Ticket> {
        self.inner.write().await.remove(id)
    }

    /// Remove several tickets under one lock.
    pub async fn remove_all(&self, ids: &[TicketId]) -> usize {
        let mut inner = self.inner.write().await;
        ids.iter().filter(|id| inner.remove(id).is_some()).count()
    }

    pub async fn contains(&self, id: &TicketId) -> bool {
        self.inner.read().await.locator.contains_key(id)
    }

    /// Snapshot one shard, filtered by `predicate`, oldest first.
    ///
    /// Takes the lock only for the copy; iteration happens lock-free.
    pub async fn scan<P>(&self, shard: &ShardKey, predicate: P) -> PoolScan
    where
        P: Fn(&Ticket) -> bool + Send + Sync + 'static,
    {
        let inner = self.inner.read().await;
        let (tickets, generation) = inner.shards.get(shard).map_or_else(
            || (Vec::new(), 0),
            |s| (s.tickets.values().cloned().collect(), s.generation),
        );
        PoolScan {
            shard: shard.clone(),
            generation,
            tickets,
            predicate: Box::new(predicate),
        }
    }

    /// Every shard seen so far, sorted.
    pub async fn shard_keys(&self) -> Vec<ShardKey> {
        let mut keys: Vec<ShardKey> = self.inner.read().await.shards.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn depth(&self, shard: &ShardKey) -> usize {
        self.inner
            .read()
            .await
            .shards
            .get(shard)
            .map_or(0, |s| s.tickets.len())
    }

    pub async fn total_depth(&self) -> usize {
        self.inner.read().await.locator.len()
    }

    pub async fn oldest_submitted(&self, shard: &ShardKey) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .shards
            .get(shard)
            .and_then(|s| s.tickets.keys().next().map(|(at, _)| *at))
    }

    /// Depth and oldest wait for every shard.
    pub async fn gauges(&self) -> Vec<ShardGauge> {
        let inner = self.inner.read().await;
        let mut gauges: Vec<ShardGauge> = inner
            .shards
            .iter()
            .map(|(key, shard)| ShardGauge {
                shard: key.clone(),
                depth: shard.tickets.len(),
                oldest_submitted_at: shard.tickets.keys().next().map(|(at, _)| *at),
            })
            .collect();
        gauges.sort_by(|a, b| a.shard.cmp(&b.shard));
        gauges
    }

    /// Current pool epoch. Take it before reading the store snapshot that
    /// will be passed to [`PoolManager::reconcile`].
    pub async fn mark(&self) -> PoolMark {
        PoolMark(self.inner.read().await.epoch)
    }

    /// Realign the cache with the store's `Pending` set, read after `mark`.
    ///
    /// Tickets missing from the cache are inserted, stale copies refreshed,
    /// and cached tickets absent from `pending` dropped. A ticket that left
    /// the pool after the mark is not re-inserted (it was claimed or
    /// finished after the snapshot may have been read), and one that entered
    /// after the mark is not dropped (the snapshot may predate it).
    pub async fn reconcile(&self, pending: Vec<Ticket>, mark: PoolMark) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut inner = self.inner.write().await;
        let live: HashSet<TicketId> = pending.iter().map(|t| t.id).collect();

        let stale: Vec<TicketId> = inner
            .locator
            .iter()
            .filter(|(id, slot)| !live.contains(*id) && slot.entered <= mark.0)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if inner.remove(&id).is_some() {
                report.dropped += 1;
            }
        }

        for ticket in pending.into_iter().filter(Ticket::is_pending) {
            if inner.departed.get(&ticket.id).is_some_and(|at| *at > mark.0) {
                report.skipped += 1;
                continue;
            }
            match inner.cached(&ticket.id).map(|t| t.updated_at) {
                Some(at) if at >= ticket.updated_at => {}
                Some(_) => {
                    inner.remove(&ticket.id);
                    inner.insert(ticket);
                    report.refreshed += 1;
                }
                None => {
                    inner.insert(ticket);
                    report.inserted += 1;
                }
            }
        }
        // Departures up to the mark can no longer race a snapshot.
        inner.departed.retain(|_, at| *at > mark.0);

        if report.changed() {
            tracing::debug!(
                inserted = report.inserted,
                refreshed = report.refreshed,
                dropped = report.dropped,
                skipped = report.skipped,
                "Pool reconciled with store"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn shard() -> ShardKey {
        ShardKey::new("casual", "eu-west")
    }

    #[tokio::test]
    async fn scan_is_oldest_first() {
        let pool = PoolManager::new();
        let t0 = Utc::now();
        let late = Ticket::dummy(&shard(), 1000, t0 + Duration::seconds(5));
        let early = Ticket::dummy(&shard(), 1000, t0);
        let mid = Ticket::dummy(&shard(), 1000, t0 + Duration::seconds(2));
        for t in [late.clone(), early.clone(), mid.clone()] {
            pool.enqueue(t).await.unwrap();
        }
        let scan = pool.scan(&shard(), |_| true).await;
        let ids: Vec<TicketId> = scan.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early.id, mid.id, late.id]);
    }

    #[tokio::test]
    async fn scan_is_restartable_and_filtered() {
        let pool = PoolManager::new();
        let t0 = Utc::now();
        for skill in [900, 1000, 1100] {
            pool.enqueue(Ticket::dummy(&shard(), skill, t0)).await.unwrap();
        }
        let scan = pool
            .scan(&shard(), |t| t.skill_rating >= rust_decimal::Decimal::new(1000, 0))
            .await;
        assert_eq!(scan.iter().count(), 2);
        assert_eq!(scan.iter().count(), 2, "second pass starts over");
        assert_eq!(scan.snapshot_len(), 3);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let pool = PoolManager::new();
        let t = Ticket::dummy(&shard(), 1000, Utc::now());
        pool.enqueue(t.clone()).await.unwrap();
        assert!(pool.remove(&t.id).await.is_some());
        assert!(pool.remove(&t.id).await.is_none());
        assert_eq!(pool.depth(&shard()).await, 0);
    }

    #[tokio::test]
    async fn rejects_non_pending() {
        let pool = PoolManager::new();
        let mut t = Ticket::dummy(&shard(), 1000, Utc::now());
        t.mark_claimed(lobbymatch_types::MatchId::deterministic(&[t.id]), Utc::now())
            .unwrap();
        assert!(pool.enqueue(t).await.is_err());
    }

    #[tokio::test]
    async fn shards_are_independent() {
        let pool = PoolManager::new();
        let other = ShardKey::new("rank", "eu-west");
        pool.enqueue(Ticket::dummy(&shard(), 1000, Utc::now())).await.unwrap();
        pool.enqueue(Ticket::dummy(&other, 1000, Utc::now())).await.unwrap();
        assert_eq!(pool.shard_keys().await.len(), 2);
        assert_eq!(pool.scan(&other, |_| true).await.iter().count(), 1);
        assert_eq!(pool.total_depth().await, 2);
    }

    #[tokio::test]
    async fn generation_moves_on_change() {
        let pool = PoolManager::new();
        let t = Ticket::dummy(&shard(), 1000, Utc::now());
        pool.enqueue(t.clone()).await.unwrap();
        let before = pool.scan(&shard(), |_| true).await.generation();
        pool.remove(&t.id).await;
        let after = pool.scan(&shard(), |_| true).await.generation();
        assert!(after > before);
    }

    #[tokio::test]
    async fn gauges_report_oldest() {
        let pool = PoolManager::new();
        let t0 = Utc::now();
        pool.enqueue(Ticket::dummy(&shard(), 1000, t0 + Duration::seconds(3))).await.unwrap();
        pool.enqueue(Ticket::dummy(&shard(), 1000, t0)).await.unwrap();
        let gauges = pool.gauges().await;
        assert_eq!(gauges.len(), 1);
        assert_eq!(gauges[0].depth, 2);
        assert_eq!(gauges[0].oldest_submitted_at, Some(t0));
        assert_eq!(pool.oldest_submitted(&shard()).await, Some(t0));
    }

    #[tokio::test]
    async fn reconcile_inserts_refreshes_and_drops() {
        let pool = PoolManager::new();
        let t0 = Utc::now();
        let kept = Ticket::dummy(&shard(), 1000, t0);
        let gone = Ticket::dummy(&shard(), 1000, t0);
        let missing = Ticket::dummy(&shard(), 1000, t0);
        for t in [kept.clone(), gone.clone()] {
            pool.enqueue(t).await.unwrap();
        }
        let mark = pool.mark().await;
        let enqueued_after_mark = Ticket::dummy(&shard(), 1000, t0);
        pool.enqueue(enqueued_after_mark.clone()).await.unwrap();

        let mut newer_kept = kept.clone();
        newer_kept.updated_at = t0 + Duration::seconds(1);
        let report = pool.reconcile(vec![newer_kept, missing.clone()], mark).await;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.dropped, 1);
        assert!(pool.contains(&missing.id).await);
        assert!(!pool.contains(&gone.id).await);
        assert!(
            pool.contains(&enqueued_after_mark.id).await,
            "entered after the snapshot was taken"
        );
    }

    #[tokio::test]
    async fn reconcile_keeps_out_tickets_taken_after_the_mark() {
        let pool = PoolManager::new();
        let t = Ticket::dummy(&shard(), 1000, Utc::now());
        pool.enqueue(t.clone()).await.unwrap();

        let mark = pool.mark().await;
        // Claimed by a worker while the snapshot still showed it pending.
        pool.remove(&t.id).await;
        let report = pool.reconcile(vec![t.clone()], mark).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 0);
        assert!(!pool.contains(&t.id).await);

        // A later snapshot that still holds it pending restores it.
        let mark = pool.mark().await;
        let report = pool.reconcile(vec![t.clone()], mark).await;
        assert_eq!(report.inserted, 1);
        assert!(pool.contains(&t.id).await);
    }

    #[tokio::test]
    async fn reconcile_keeps_tickets_stamped_before_the_snapshot() {
        let pool = PoolManager::new();
        let t0 = Utc::now();
        let mark = pool.mark().await;
        // Stored and cached after the mark, but stamped earlier than the
        // snapshot's read time.
        let late_arrival = Ticket::dummy(&shard(), 1000, t0 - Duration::seconds(1));
        pool.enqueue(late_arrival.clone()).await.unwrap();

        let report = pool.reconcile(Vec::new(), mark).await;
        assert_eq!(report.dropped, 0);
        assert!(pool.contains(&late_arrival.id).await);
    }
}
