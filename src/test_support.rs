//! Shared fixtures for unit tests.

use crate::config::LeaseConfig;
use crate::error::StoreError;
use crate::listener::{InvalidLockListener, LoggingListener};
use crate::lock::DistributedLock;
use crate::scheduler::RenewalScheduler;
use crate::store::{LockRecord, LockStore, MemoryBackend, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Short leases so renewal and expiry happen within a test's lifetime.
pub(crate) fn fast_config() -> LeaseConfig {
    LeaseConfig {
        ttl_ms: 500,
        renewal_interval_ms: 100,
        local_retry_idle_sleep_ms: 10,
        idle_eviction_timeout_ms: 1_000,
        ..LeaseConfig::default()
    }
}

pub(crate) fn scheduler() -> Arc<RenewalScheduler> {
    Arc::new(RenewalScheduler::new(2).unwrap())
}

pub(crate) fn logging_listener() -> Arc<dyn InvalidLockListener> {
    Arc::new(LoggingListener)
}

/// Two owners sharing one in-memory store, as two processes would.
pub(crate) struct TwoOwners {
    pub backend: Arc<MemoryBackend>,
    pub alice: Arc<dyn LockStore>,
    pub bob: Arc<dyn LockStore>,
}

pub(crate) fn two_owners() -> TwoOwners {
    let backend = MemoryBackend::new();
    TwoOwners {
        alice: Arc::new(backend.session("alice")),
        bob: Arc::new(backend.session("bob")),
        backend,
    }
}

/// A lock for `key` with its own scheduler and the logging listener.
pub(crate) fn lock_for(key: &str, config: &LeaseConfig, store: Arc<dyn LockStore>) -> DistributedLock {
    DistributedLock::new(key, config, store, scheduler(), logging_listener())
}

/// Store operations that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Now,
    Fetch,
    Create,
    Update,
    UpdateExpiry,
    Exists,
    Delete,
    DeleteExpired,
    Records,
}

/// Wraps a store, counting calls per operation and failing selected
/// operations on demand.
pub(crate) struct FaultyStore {
    inner: Arc<dyn LockStore>,
    failures: Mutex<HashMap<Op, StoreError>>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl FaultyStore {
    pub(crate) fn new(inner: Arc<dyn LockStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Make every subsequent `op` return `error`.
    pub(crate) fn fail(&self, op: Op, error: StoreError) {
        self.failures.lock().insert(op, error);
    }

    pub(crate) fn heal(&self, op: Op) {
        self.failures.lock().remove(&op);
    }

    pub(crate) fn heal_all(&self) {
        self.failures.lock().clear();
    }

    pub(crate) fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: Op) -> StoreResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        match self.failures.lock().get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl LockStore for FaultyStore {
    fn owner_id(&self) -> &str {
        self.inner.owner_id()
    }

    fn now(&self) -> StoreResult<DateTime<Utc>> {
        self.enter(Op::Now)?;
        self.inner.now()
    }

    fn fetch(&self, key: &str) -> StoreResult<Option<LockRecord>> {
        self.enter(Op::Fetch)?;
        self.inner.fetch(key)
    }

    fn create(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.enter(Op::Create)?;
        self.inner.create(key, ttl)
    }

    fn update(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.enter(Op::Update)?;
        self.inner.update(key, ttl)
    }

    fn update_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.enter(Op::UpdateExpiry)?;
        self.inner.update_expiry(key, ttl)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.enter(Op::Exists)?;
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.enter(Op::Delete)?;
        self.inner.delete(key)
    }

    fn delete_expired(&self, key: &str) -> StoreResult<bool> {
        self.enter(Op::DeleteExpired)?;
        self.inner.delete_expired(key)
    }

    fn records(&self) -> StoreResult<Vec<LockRecord>> {
        self.enter(Op::Records)?;
        self.inner.records()
    }
}
