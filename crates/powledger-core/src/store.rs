//! Transactional key/value contract the ledger persists through.

use crate::error::{Result, StoreError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Read/write view of the namespace inside one [`PersistentStore::atomic_update`].
pub trait StoreTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
}

/// Trait the storage backends implement for the ledger to operate.
pub trait PersistentStore: Send + Sync {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Runs `f` with transactional access. All reads and writes made by one call
    /// are atomic with respect to other calls, and nothing `f` wrote is visible
    /// if it returns an error. Backends may run `f` more than once on conflict.
    fn atomic_update<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&dyn StoreTxn) -> Result<T>;
}

impl<S: PersistentStore> PersistentStore for Arc<S> {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).read(key)
    }

    fn atomic_update<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&dyn StoreTxn) -> Result<T>,
    {
        (**self).atomic_update(f)
    }
}

/// In-memory store; writes are staged and applied only when the update succeeds.
///
/// Updates are serialized by `writer`; the entry map is locked only for single
/// lookups and for the final apply, so reads never wait on a running update.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites a value outside any transaction.
    pub fn insert_raw(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

struct StagedTxn<'a> {
    committed: &'a RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    pending: RefCell<HashMap<Vec<u8>, Vec<u8>>>,
}

impl StoreTxn for StagedTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(v) = self.pending.borrow().get(key) {
            return Ok(Some(v.clone()));
        }
        let committed = self.committed.read().map_err(|_| poisoned())?;
        Ok(committed.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.pending.borrow_mut().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn atomic_update<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&dyn StoreTxn) -> Result<T>,
    {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        let txn = StagedTxn {
            committed: &self.entries,
            pending: RefCell::new(HashMap::new()),
        };
        let value = f(&txn)?;
        let pending = txn.pending.into_inner();
        self.entries.write().map_err(|_| poisoned())?.extend(pending);
        Ok(value)
    }
}

/// Bounded attempts with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// Wraps a store so failed `atomic_update` calls are retried per `policy`.
/// Only [`StoreError`]s are retried; mining and decoding failures pass through.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: PersistentStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: PersistentStore> PersistentStore for RetryingStore<S> {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.read(key)
    }

    fn atomic_update<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&dyn StoreTxn) -> Result<T>,
    {
        let mut attempt = 1;
        let mut backoff = self.policy.initial_backoff;
        loop {
            match self.inner.atomic_update(&f) {
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(attempt, error = %e, "store update failed, retrying");
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}
