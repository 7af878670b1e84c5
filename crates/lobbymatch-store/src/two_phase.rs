//! Multi-key conditional writes over a single-key CAS store.
//!
//! Protocol for one `compare_and_swap_multi` call:
//!
//! 1. **Lease**: in key order, take `lease:{key}` with `CAS(Absent -> owner)`
//!    and a bounded TTL. Losing any lease releases the ones already held
//!    and reports a failed condition.
//! 2. **Verify**: read every key and evaluate its precondition.
//! 3. **Commit**: apply each mutation with a single-key CAS against the
//!    value read in step 2. A partial failure restores the keys already
//!    written.
//! 4. **Release**: drop the leases held by this owner.
//!
//! Leases only exclude writers that go through this adapter, so every
//! conditional writer of a key must share one `TwoPhaseClaimStore`
//! configuration (lease prefix and TTL). An expired lease from a crashed
//! writer frees itself after the TTL.

use std::time::Duration;

use async_trait::async_trait;
use lobbymatch_types::{LobbymatchError, MatchmakingConfig, Result};
use uuid::Uuid;

use crate::contract::{
    CasOp, Mutation, Precondition, SharedStateStore, SingleKeyStore, StoreEntry,
};

const LEASE_PREFIX: &str = "lease:";

/// Adapter that provides [`SharedStateStore`] on top of a [`SingleKeyStore`].
pub struct TwoPhaseClaimStore<S> {
    inner: S,
    lease_ttl: Duration,
}

impl<S: SingleKeyStore> TwoPhaseClaimStore<S> {
    pub fn new(inner: S, lease_ttl: Duration) -> Self {
        Self { inner, lease_ttl }
    }

    /// Adapter leasing keys for the configured `claim_lease_ms`.
    pub fn from_config(inner: S, config: &MatchmakingConfig) -> Self {
        Self::new(inner, config.claim_lease())
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn lease_key(key: &str) -> String {
        format!("{LEASE_PREFIX}{key}")
    }

    async fn acquire(&self, key: &str, owner: &str) -> Result<bool> {
        let lease = Self::lease_key(key);
        let taken = self
            .inner
            .compare_and_swap(
                &lease,
                &Precondition::Absent,
                &Mutation::Put(StoreEntry::marker(owner)),
            )
            .await?;
        if taken {
            self.inner.expire_after(&lease, self.lease_ttl).await?;
        }
        Ok(taken)
    }

    async fn release(&self, keys: &[&str], owner: &str) {
        for key in keys {
            let lease = Self::lease_key(key);
            if let Err(e) = self
                .inner
                .compare_and_swap(
                    &lease,
                    &Precondition::TagEquals(owner.to_string()),
                    &Mutation::Delete,
                )
                .await
            {
                tracing::warn!(lease = %lease, error = %e, "Failed to release lease; it will expire");
            }
        }
    }

    /// Undo writes applied before a commit failure.
    async fn rollback(&self, applied: &[(&CasOp, Option<StoreEntry>)]) {
        for (op, prior) in applied.iter().rev() {
            let expect = match &op.mutation {
                Mutation::Put(entry) => Precondition::EntryEquals(entry.clone()),
                Mutation::Delete => Precondition::Absent,
                Mutation::Keep => continue,
            };
            let restore = match prior {
                Some(entry) => Mutation::Put(entry.clone()),
                None => Mutation::Delete,
            };
            match self.inner.compare_and_swap(&op.key, &expect, &restore).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(key = %op.key, "Rollback skipped: key changed under lease");
                }
                Err(e) => {
                    tracing::error!(key = %op.key, error = %e, "Rollback failed");
                }
            }
        }
    }

    async fn verify(&self, ops: &[&CasOp]) -> Result<Option<Vec<Option<StoreEntry>>>> {
        let mut current = Vec::with_capacity(ops.len());
        for op in ops {
            let value = self.inner.get(&op.key).await?;
            if !op.expect.holds(value.as_ref()) {
                return Ok(None);
            }
            current.push(value);
        }
        Ok(Some(current))
    }

    async fn commit(&self, ops: &[&CasOp], current: Vec<Option<StoreEntry>>) -> Result<bool> {
        let mut applied: Vec<(&CasOp, Option<StoreEntry>)> = Vec::with_capacity(ops.len());
        for (&op, prior) in ops.iter().zip(current) {
            if op.mutation == Mutation::Keep {
                continue;
            }
            let expect = match &prior {
                Some(entry) => Precondition::EntryEquals(entry.clone()),
                None => Precondition::Absent,
            };
            match self.inner.compare_and_swap(&op.key, &expect, &op.mutation).await {
                Ok(true) => applied.push((op, prior)),
                Ok(false) => {
                    tracing::warn!(key = %op.key, "Key changed under lease; rolling back");
                    self.rollback(&applied).await;
                    return Ok(false);
                }
                Err(e) => {
                    self.rollback(&applied).await;
                    return Err(e);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl<S: SingleKeyStore> SharedStateStore for TwoPhaseClaimStore<S> {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        self.inner.put(key, entry).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        self.inner.get(key).await
    }

    async fn compare_and_swap_multi(&self, ops: &[CasOp]) -> Result<bool> {
        let mut ordered: Vec<&CasOp> = ops.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));
        if ordered.windows(2).any(|w| w[0].key == w[1].key) {
            return Err(LobbymatchError::Internal(
                "duplicate key in conditional write".into(),
            ));
        }

        let owner = Uuid::now_v7().to_string();
        let mut held: Vec<&str> = Vec::with_capacity(ordered.len());
        for op in &ordered {
            match self.acquire(&op.key, &owner).await {
                Ok(true) => held.push(op.key.as_str()),
                Ok(false) => {
                    tracing::debug!(key = %op.key, "Lease held by another writer");
                    self.release(&held, &owner).await;
                    return Ok(false);
                }
                Err(e) => {
                    // The lease may have been written before the TTL call failed.
                    held.push(op.key.as_str());
                    self.release(&held, &owner).await;
                    return Err(e);
                }
            }
        }

        let outcome = match self.verify(&ordered).await {
            Ok(Some(current)) => self.commit(&ordered, current).await,
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        self.release(&held, &owner).await;
        outcome
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire_after(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        let entries = self.inner.scan_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter(|(key, _)| !key.starts_with(LEASE_PREFIX))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{FlakyCasStore, InMemoryStore};
    use lobbymatch_types::ManualClock;

    fn adapter() -> (Arc<ManualClock>, TwoPhaseClaimStore<InMemoryStore>) {
        let clock = Arc::new(ManualClock::fixed());
        let inner = InMemoryStore::with_clock(clock.clone());
        (clock, TwoPhaseClaimStore::new(inner, Duration::from_secs(2)))
    }

    fn pending() -> Precondition {
        Precondition::TagEquals("PENDING".into())
    }

    async fn seed(store: &TwoPhaseClaimStore<InMemoryStore>, key: &str, tag: &str) {
        SharedStateStore::put(store, key, StoreEntry::marker(tag))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commits_all_keys_and_releases_leases() {
        let (_, store) = adapter();
        seed(&store, "ticket:1", "PENDING").await;
        seed(&store, "ticket:2", "PENDING").await;

        let ops = vec![
            CasOp::put("ticket:2", pending(), StoreEntry::marker("CLAIMED")),
            CasOp::put("ticket:1", pending(), StoreEntry::marker("CLAIMED")),
        ];
        assert!(store.compare_and_swap_multi(&ops).await.unwrap());

        for key in ["ticket:1", "ticket:2"] {
            let entry = SharedStateStore::get(&store, key).await.unwrap().unwrap();
            assert_eq!(entry.tag, "CLAIMED");
        }
        let leases = SingleKeyStore::scan_prefix(store.inner(), LEASE_PREFIX)
            .await
            .unwrap();
        assert!(leases.is_empty(), "leases must be released: {leases:?}");
    }

    #[tokio::test]
    async fn failed_condition_changes_nothing() {
        let (_, store) = adapter();
        seed(&store, "ticket:1", "PENDING").await;
        seed(&store, "ticket:2", "EXPIRED").await;

        let ops = vec![
            CasOp::put("ticket:1", pending(), StoreEntry::marker("CLAIMED")),
            CasOp::put("ticket:2", pending(), StoreEntry::marker("CLAIMED")),
        ];
        assert!(!store.compare_and_swap_multi(&ops).await.unwrap());
        let first = SharedStateStore::get(&store, "ticket:1").await.unwrap().unwrap();
        assert_eq!(first.tag, "PENDING");
    }

    #[tokio::test]
    async fn held_lease_blocks_until_it_expires() {
        let (clock, store) = adapter();
        seed(&store, "ticket:1", "PENDING").await;
        // A crashed writer left its lease behind.
        SingleKeyStore::put(store.inner(), "lease:ticket:1", StoreEntry::marker("ghost"))
            .await
            .unwrap();
        SingleKeyStore::expire_after(store.inner(), "lease:ticket:1", Duration::from_secs(2))
            .await
            .unwrap();

        let ops = vec![CasOp::put("ticket:1", pending(), StoreEntry::marker("CLAIMED"))];
        assert!(!store.compare_and_swap_multi(&ops).await.unwrap());

        clock.advance(Duration::from_secs(3));
        assert!(store.compare_and_swap_multi(&ops).await.unwrap());
    }

    #[tokio::test]
    async fn scan_hides_leases() {
        let (_, store) = adapter();
        seed(&store, "ticket:1", "PENDING").await;
        SingleKeyStore::put(store.inner(), "lease:ticket:1", StoreEntry::marker("x"))
            .await
            .unwrap();
        let all = SharedStateStore::scan_prefix(&store, "").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "ticket:1");
    }

    #[tokio::test]
    async fn absent_to_put_and_delete() {
        let (_, store) = adapter();
        seed(&store, "index:a", "t1").await;
        let ops = vec![
            CasOp::put("match:1", Precondition::Absent, StoreEntry::marker("m")),
            CasOp::delete("index:a", Precondition::TagEquals("t1".into())),
        ];
        assert!(store.compare_and_swap_multi(&ops).await.unwrap());
        assert!(SharedStateStore::get(&store, "index:a").await.unwrap().is_none());
        assert!(SharedStateStore::get(&store, "match:1").await.unwrap().is_some());
    }

    #[test]
    fn lease_comes_from_config() {
        let config = MatchmakingConfig {
            claim_lease_ms: 750,
            ..MatchmakingConfig::default()
        };
        let store = TwoPhaseClaimStore::from_config(InMemoryStore::new(), &config);
        assert_eq!(store.lease_ttl(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn partial_commit_failure_restores_written_keys() {
        let store = TwoPhaseClaimStore::new(
            FlakyCasStore::new(InMemoryStore::new()),
            Duration::from_secs(2),
        );
        let keys = ["ticket:1", "ticket:2", "ticket:3"];
        let mut prior = Vec::new();
        for (n, key) in keys.iter().enumerate() {
            let entry = StoreEntry::new("PENDING", format!("{{\"n\":{n}}}").into_bytes());
            SharedStateStore::put(&store, key, entry.clone()).await.unwrap();
            prior.push(entry);
        }
        // Commit runs in key order: the first two writes land, the third fails.
        store.inner().fail_next_cas_on("ticket:3");

        let ops: Vec<CasOp> = keys
            .iter()
            .map(|key| CasOp::put(*key, pending(), StoreEntry::marker("CLAIMED")))
            .collect();
        let err = store.compare_and_swap_multi(&ops).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.inner().injected_failures(), 1);

        for (key, expected) in keys.iter().zip(&prior) {
            let entry = SharedStateStore::get(&store, key).await.unwrap().unwrap();
            assert_eq!(&entry, expected, "{key} must hold its prior entry");
        }
        let leases = SingleKeyStore::scan_prefix(store.inner().inner(), LEASE_PREFIX)
            .await
            .unwrap();
        assert!(leases.is_empty(), "leases must be released: {leases:?}");

        // Nothing is left half-claimed: the same write now succeeds whole.
        assert!(store.compare_and_swap_multi(&ops).await.unwrap());
    }
}
