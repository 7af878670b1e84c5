//! In-memory implementation of the store contracts.
//!
//! Deterministic and non-persistent: used by tests and single-process
//! deployments. Expiry is lazy; an expired key is dropped the next time
//! any operation touches it, and is never visible in the meantime.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lobbymatch_types::{Clock, LobbymatchError, Result, SystemClock};
use tokio::sync::Mutex;

use crate::contract::{CasOp, Mutation, Precondition, SharedStateStore, SingleKeyStore, StoreEntry};

#[derive(Debug, Clone)]
struct Slot {
    entry: StoreEntry,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory store with TTL support, backed by a sorted map.
pub struct InMemoryStore {
    slots: Mutex<BTreeMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Store reading the system clock for TTLs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store reading TTLs against the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a key, if one is set.
    pub async fn ttl_of(&self, key: &str) -> Option<chrono::Duration> {
        let now = self.clock.now();
        let slots = self.slots.lock().await;
        slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at - now)
    }

    fn purge(slots: &mut BTreeMap<String, Slot>, key: &str, now: DateTime<Utc>) {
        if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            slots.remove(key);
        }
    }

    fn apply(slots: &mut BTreeMap<String, Slot>, key: &str, mutation: &Mutation) {
        match mutation {
            Mutation::Put(entry) => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        entry: entry.clone(),
                        expires_at: None,
                    },
                );
            }
            Mutation::Delete => {
                slots.remove(key);
            }
            Mutation::Keep => {}
        }
    }

    async fn put_entry(&self, key: &str, entry: StoreEntry) {
        let mut slots = self.slots.lock().await;
        Self::apply(&mut slots, key, &Mutation::Put(entry));
    }

    async fn get_entry(&self, key: &str) -> Option<StoreEntry> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        Self::purge(&mut slots, key, now);
        slots.get(key).map(|slot| slot.entry.clone())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LobbymatchError::Internal(format!("ttl out of range: {e}")))?;
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        Self::purge(&mut slots, key, now);
        match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = now.checked_add_signed(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str) -> Vec<(String, StoreEntry)> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| slot.is_live(now));
        slots
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, slot)| (key.clone(), slot.entry.clone()))
            .collect()
    }
}

#[async_trait]
impl SharedStateStore for InMemoryStore {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        self.put_entry(key, entry).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        Ok(self.get_entry(key).await)
    }

    async fn compare_and_swap_multi(&self, ops: &[CasOp]) -> Result<bool> {
        let mut keys = HashSet::with_capacity(ops.len());
        if !ops.iter().all(|op| keys.insert(op.key.as_str())) {
            return Err(LobbymatchError::Internal(
                "duplicate key in conditional write".into(),
            ));
        }

        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        for op in ops {
            Self::purge(&mut slots, &op.key, now);
        }
        let all_hold = ops
            .iter()
            .all(|op| op.expect.holds(slots.get(&op.key).map(|slot| &slot.entry)));
        if !all_hold {
            return Ok(false);
        }
        for op in ops {
            Self::apply(&mut slots, &op.key, &op.mutation);
        }
        Ok(true)
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.set_expiry(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        Ok(self.scan(prefix).await)
    }
}

#[async_trait]
impl SingleKeyStore for InMemoryStore {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        self.put_entry(key, entry).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        Ok(self.get_entry(key).await)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &Precondition,
        mutation: &Mutation,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        Self::purge(&mut slots, key, now);
        if !expect.holds(slots.get(key).map(|slot| &slot.entry)) {
            return Ok(false);
        }
        Self::apply(&mut slots, key, mutation);
        Ok(true)
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.set_expiry(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        Ok(self.scan(prefix).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbymatch_types::ManualClock;

    fn store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::fixed());
        let store = InMemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    fn pending() -> StoreEntry {
        StoreEntry::new("PENDING", b"a".to_vec())
    }

    #[tokio::test]
    async fn multi_cas_is_all_or_nothing() {
        let (_, store) = store();
        SharedStateStore::put(&store, "ticket:1", pending()).await.unwrap();
        SharedStateStore::put(&store, "ticket:2", StoreEntry::marker("CLAIMED"))
            .await
            .unwrap();

        let claimed = StoreEntry::marker("CLAIMED");
        let ops = vec![
            CasOp::put("ticket:1", Precondition::TagEquals("PENDING".into()), claimed.clone()),
            CasOp::put("ticket:2", Precondition::TagEquals("PENDING".into()), claimed),
        ];
        assert!(!store.compare_and_swap_multi(&ops).await.unwrap());
        let first = SharedStateStore::get(&store, "ticket:1").await.unwrap().unwrap();
        assert_eq!(first.tag, "PENDING", "no partial write on failure");
    }

    #[tokio::test]
    async fn multi_cas_applies_puts_deletes_and_checks() {
        let (_, store) = store();
        SharedStateStore::put(&store, "a", pending()).await.unwrap();
        SharedStateStore::put(&store, "b", pending()).await.unwrap();
        SharedStateStore::put(&store, "c", pending()).await.unwrap();

        let ops = vec![
            CasOp::put("a", Precondition::EntryEquals(pending()), StoreEntry::marker("MATCHED")),
            CasOp::delete("b", Precondition::Present),
            CasOp::check("c", Precondition::TagEquals("PENDING".into())),
            CasOp::put("d", Precondition::Absent, StoreEntry::marker("NEW")),
        ];
        assert!(store.compare_and_swap_multi(&ops).await.unwrap());
        assert_eq!(
            SharedStateStore::get(&store, "a").await.unwrap().unwrap().tag,
            "MATCHED"
        );
        assert!(SharedStateStore::get(&store, "b").await.unwrap().is_none());
        assert_eq!(SharedStateStore::get(&store, "c").await.unwrap(), Some(pending()));
        assert!(SharedStateStore::get(&store, "d").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_keys_rejected() {
        let (_, store) = store();
        let ops = vec![
            CasOp::check("a", Precondition::Absent),
            CasOp::check("a", Precondition::Absent),
        ];
        assert!(store.compare_and_swap_multi(&ops).await.is_err());
    }

    #[tokio::test]
    async fn ttl_expires_lazily() {
        let (clock, store) = store();
        SharedStateStore::put(&store, "ticket:1", pending()).await.unwrap();
        assert!(
            SharedStateStore::expire_after(&store, "ticket:1", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(store.ttl_of("ticket:1").await.is_some());

        clock.advance(Duration::from_secs(9));
        assert!(SharedStateStore::get(&store, "ticket:1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(SharedStateStore::get(&store, "ticket:1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn write_clears_ttl() {
        let (clock, store) = store();
        SharedStateStore::put(&store, "k", pending()).await.unwrap();
        SharedStateStore::expire_after(&store, "k", Duration::from_secs(1))
            .await
            .unwrap();
        SharedStateStore::put(&store, "k", pending()).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(SharedStateStore::get(&store, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expire_missing_key_is_false() {
        let (_, store) = store();
        assert!(
            !SharedStateStore::expire_after(&store, "missing", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn expired_key_counts_as_absent_for_cas() {
        let (clock, store) = store();
        SharedStateStore::put(&store, "lease:x", StoreEntry::marker("owner-a"))
            .await
            .unwrap();
        SharedStateStore::expire_after(&store, "lease:x", Duration::from_millis(500))
            .await
            .unwrap();
        clock.advance_ms(501);
        let taken = SingleKeyStore::compare_and_swap(
            &store,
            "lease:x",
            &Precondition::Absent,
            &Mutation::Put(StoreEntry::marker("owner-b")),
        )
        .await
        .unwrap();
        assert!(taken);
    }

    #[tokio::test]
    async fn scan_prefix_is_sorted_and_bounded() {
        let (_, store) = store();
        for key in ["ticket:b", "ticket:a", "match:z", "ticketz"] {
            SharedStateStore::put(&store, key, pending()).await.unwrap();
        }
        let keys: Vec<String> = SharedStateStore::scan_prefix(&store, "ticket:")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["ticket:a".to_string(), "ticket:b".to_string()]);
    }
}
