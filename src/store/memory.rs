//! In-process lock store.
//!
//! A [`MemoryBackend`] holds the records and the clock. Each
//! [`MemoryLockStore`] is a view of the backend for one owner id, standing in
//! for one process talking to a shared database. Every operation runs under
//! the backend's mutex, which makes the conditional mutations atomic.

use super::clock::{StoreClock, SystemClock};
use super::types::{LockRecord, expiry_after};
use super::{LockStore, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Records and clock shared by every [`MemoryLockStore`] view.
pub struct MemoryBackend {
    records: Mutex<HashMap<String, LockRecord>>,
    clock: Arc<dyn StoreClock>,
}

impl MemoryBackend {
    /// A backend timed by the host's wall clock.
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn StoreClock>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            clock,
        })
    }

    /// A view of this backend acting as `owner_id`.
    pub fn session(self: &Arc<Self>, owner_id: impl Into<String>) -> MemoryLockStore {
        MemoryLockStore {
            backend: Arc::clone(self),
            owner_id: owner_id.into(),
        }
    }

    /// Number of records, live or expired.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("records", &self.records.lock().len())
            .finish()
    }
}

/// A [`LockStore`] over a [`MemoryBackend`] for a single owner.
#[derive(Debug, Clone)]
pub struct MemoryLockStore {
    backend: Arc<MemoryBackend>,
    owner_id: String,
}

impl MemoryLockStore {
    /// A standalone store with its own backend.
    pub fn new(owner_id: impl Into<String>) -> Self {
        MemoryBackend::new().session(owner_id)
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    fn clock_now(&self) -> DateTime<Utc> {
        self.backend.clock.now()
    }
}

impl LockStore for MemoryLockStore {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn now(&self) -> StoreResult<DateTime<Utc>> {
        Ok(self.clock_now())
    }

    fn fetch(&self, key: &str) -> StoreResult<Option<LockRecord>> {
        Ok(self.backend.records.lock().get(key).cloned())
    }

    fn create(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut records = self.backend.records.lock();
        if records.contains_key(key) {
            return Ok(false);
        }
        let record = LockRecord::new(key, &self.owner_id, self.clock_now(), ttl);
        records.insert(key.to_string(), record);
        Ok(true)
    }

    fn update(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut records = self.backend.records.lock();
        let now = self.clock_now();
        match records.get_mut(key) {
            Some(record) if record.is_owned_by(&self.owner_id) || record.is_expired(now) => {
                record.owner_id = self.owner_id.clone();
                record.expires_at = expiry_after(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn update_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut records = self.backend.records.lock();
        let now = self.clock_now();
        match records.get_mut(key) {
            Some(record) if record.is_owned_by(&self.owner_id) => {
                record.expires_at = expiry_after(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock_now();
        Ok(self
            .backend
            .records
            .lock()
            .get(key)
            .is_some_and(|record| !record.is_expired(now)))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut records = self.backend.records.lock();
        if records
            .get(key)
            .is_some_and(|record| record.is_owned_by(&self.owner_id))
        {
            records.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn delete_expired(&self, key: &str) -> StoreResult<bool> {
        let mut records = self.backend.records.lock();
        let now = self.clock_now();
        if records.get(key).is_some_and(|record| record.is_expired(now)) {
            records.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn records(&self) -> StoreResult<Vec<LockRecord>> {
        let mut records: Vec<_> = self.backend.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
