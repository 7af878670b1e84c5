//! Fault-injecting store wrapper for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lobbymatch_types::{LobbymatchError, Result};

use crate::contract::{CasOp, Mutation, Precondition, SharedStateStore, SingleKeyStore, StoreEntry};

fn countdown(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Wraps a store and fails calls on demand with `StoreUnavailable`.
pub struct FlakyStore<S> {
    inner: S,
    fail_next: AtomicU32,
    lose_replies: AtomicU32,
    lose_reply_touching: Mutex<Option<String>>,
    down: AtomicBool,
    failures: AtomicU64,
}

impl<S: SharedStateStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_next: AtomicU32::new(0),
            lose_replies: AtomicU32::new(0),
            lose_reply_touching: Mutex::new(None),
            down: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Apply the next `n` multi-key writes but report `StoreUnavailable`,
    /// as a backend does when the reply is lost after the write landed.
    pub fn lose_next_replies(&self, n: u32) {
        self.lose_replies.store(n, Ordering::SeqCst);
    }

    /// Like [`Self::lose_next_replies`], once, for the next multi-key write
    /// with a key starting with `prefix`.
    pub fn lose_reply_touching(&self, prefix: impl Into<String>) {
        *self
            .lose_reply_touching
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(prefix.into());
    }

    fn reply_lost(&self, ops: &[CasOp]) -> bool {
        let mut touching = self
            .lose_reply_touching
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let hit = touching
            .as_deref()
            .is_some_and(|prefix| ops.iter().any(|op| op.key.starts_with(prefix)));
        if hit {
            *touching = None;
            return true;
        }
        drop(touching);
        countdown(&self.lose_replies)
    }

    /// Fail every call until set back to `false`.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    pub fn injected_failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, op: &str) -> Result<()> {
        let injected = self.down.load(Ordering::SeqCst) || countdown(&self.fail_next);
        if injected {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(LobbymatchError::store_unavailable(format!(
                "injected failure during {op}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SharedStateStore> SharedStateStore for FlakyStore<S> {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        self.check("put")?;
        self.inner.put(key, entry).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn compare_and_swap_multi(&self, ops: &[CasOp]) -> Result<bool> {
        self.check("compare_and_swap_multi")?;
        let applied = self.inner.compare_and_swap_multi(ops).await?;
        if self.reply_lost(ops) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(LobbymatchError::store_unavailable(format!(
                "reply lost after compare_and_swap_multi (applied: {applied})"
            )));
        }
        Ok(applied)
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire_after")?;
        self.inner.expire_after(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        self.check("scan_prefix")?;
        self.inner.scan_prefix(prefix).await
    }
}

/// Single-key store that fails the next conditional write on chosen keys.
///
/// Sits under a [`TwoPhaseClaimStore`](crate::TwoPhaseClaimStore) to break
/// its commit phase part-way through.
pub struct FlakyCasStore<S> {
    inner: S,
    /// Armed keys, each with the number of calls to let through first.
    fail_on: Mutex<Vec<(String, u32)>>,
    failures: AtomicU64,
}

impl<S: SingleKeyStore> FlakyCasStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_on: Mutex::new(Vec::new()),
            failures: AtomicU64::new(0),
        }
    }

    /// Fail the next `compare_and_swap` against `key`, once.
    pub fn fail_next_cas_on(&self, key: impl Into<String>) {
        self.fail_cas_on(key, 0);
    }

    /// Let `skip` calls against `key` through, then fail the next one.
    pub fn fail_cas_on(&self, key: impl Into<String>, skip: u32) {
        self.fail_on
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((key.into(), skip));
    }

    pub fn injected_failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn armed(&self, key: &str) -> bool {
        let mut fail_on = self
            .fail_on
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(at) = fail_on.iter().position(|(k, _)| k == key) else {
            return false;
        };
        if fail_on[at].1 > 0 {
            fail_on[at].1 -= 1;
            return false;
        }
        fail_on.remove(at);
        true
    }
}

#[async_trait]
impl<S: SingleKeyStore> SingleKeyStore for FlakyCasStore<S> {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        self.inner.put(key, entry).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &Precondition,
        mutation: &Mutation,
    ) -> Result<bool> {
        if self.armed(key) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(LobbymatchError::store_unavailable(format!(
                "injected failure during compare_and_swap on {key}"
            )));
        }
        self.inner.compare_and_swap(key, expect, mutation).await
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire_after(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        self.inner.scan_prefix(prefix).await
    }
}
