//! The Shared State Store contract.
//!
//! The engine depends only on these semantics: single-key put/get, an
//! all-or-nothing conditional write over many keys, TTL expiry, and a
//! prefix scan for membership snapshots. Any product offering them
//! (a distributed cache, a consensus KV) can back the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lobbymatch_types::Result;

/// A stored value: a short state tag used by conditions, plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub tag: String,
    pub body: Vec<u8>,
}

impl StoreEntry {
    #[must_use]
    pub fn new(tag: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            body,
        }
    }

    /// An entry that carries only a tag.
    #[must_use]
    pub fn marker(tag: impl Into<String>) -> Self {
        Self::new(tag, Vec::new())
    }
}

/// Condition a key must satisfy for a conditional write to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The key does not exist (or has expired).
    Absent,
    /// The key exists with any value.
    Present,
    /// The key exists and its tag equals the given value.
    TagEquals(String),
    /// The key holds exactly this entry.
    EntryEquals(StoreEntry),
}

impl Precondition {
    /// Evaluate against the current value of a key.
    #[must_use]
    pub fn holds(&self, current: Option<&StoreEntry>) -> bool {
        match (self, current) {
            (Self::Absent, None) | (Self::Present, Some(_)) => true,
            (Self::TagEquals(tag), Some(entry)) => entry.tag == *tag,
            (Self::EntryEquals(expected), Some(entry)) => entry == expected,
            _ => false,
        }
    }
}

/// What a conditional write does to a key once every condition holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(StoreEntry),
    Delete,
    /// Condition only; the key is left untouched.
    Keep,
}

/// One key of a multi-key conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasOp {
    pub key: String,
    pub expect: Precondition,
    pub mutation: Mutation,
}

impl CasOp {
    #[must_use]
    pub fn put(key: impl Into<String>, expect: Precondition, entry: StoreEntry) -> Self {
        Self {
            key: key.into(),
            expect,
            mutation: Mutation::Put(entry),
        }
    }

    #[must_use]
    pub fn delete(key: impl Into<String>, expect: Precondition) -> Self {
        Self {
            key: key.into(),
            expect,
            mutation: Mutation::Delete,
        }
    }

    #[must_use]
    pub fn check(key: impl Into<String>, expect: Precondition) -> Self {
        Self {
            key: key.into(),
            expect,
            mutation: Mutation::Keep,
        }
    }
}

/// Store with native multi-key conditional writes.
///
/// Every method may fail with `StoreUnavailable`; a failed
/// `compare_and_swap_multi` leaves no partial state behind.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Unconditional write. Clears any TTL on the key.
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>>;

    /// Apply every mutation iff every precondition holds. Returns `false`
    /// (and changes nothing) when any precondition fails.
    async fn compare_and_swap_multi(&self, ops: &[CasOp]) -> Result<bool>;

    /// Schedule the key for removal after `ttl`. Returns `false` if the key
    /// does not exist. A later write to the key clears the TTL.
    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// All live keys starting with `prefix`, sorted by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>>;
}

/// Store that only offers single-key conditional writes.
///
/// Wrap it in [`crate::TwoPhaseClaimStore`] to obtain a [`SharedStateStore`].
#[async_trait]
pub trait SingleKeyStore: Send + Sync {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>>;

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &Precondition,
        mutation: &Mutation,
    ) -> Result<bool>;

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>>;
}

/// A shared handle, so several adapters can front one store.
#[async_trait]
impl<S: SingleKeyStore + ?Sized> SingleKeyStore for Arc<S> {
    async fn put(&self, key: &str, entry: StoreEntry) -> Result<()> {
        (**self).put(key, entry).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoreEntry>> {
        (**self).get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &Precondition,
        mutation: &Mutation,
    ) -> Result<bool> {
        (**self).compare_and_swap(key, expect, mutation).await
    }

    async fn expire_after(&self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).expire_after(key, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoreEntry)>> {
        (**self).scan_prefix(prefix).await
    }
}
