//! Process-wide lookup of lock handles by key.
//!
//! The registry hands out one [`DistributedLock`] per (normalized) key, all
//! bound to the same config, store, scheduler, and listener, and evicts
//! handles that have sat idle. Eviction never drops a handle whose key is
//! still in use, locally or by another owner.


use crate::config::LeaseConfig;
use crate::error::{LeaseError, Result, STORE_WIDE_KEY};
use crate::listener::InvalidLockListener;
use crate::lock::DistributedLock;
use crate::scheduler::{RenewalScheduler, TaskHandle, TickOutcome};
use crate::store::LockStore;
use chrono::TimeDelta;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

struct RegistryState {
    config: LeaseConfig,
    store: Arc<dyn LockStore>,
    scheduler: Arc<RenewalScheduler>,
    listener: Arc<dyn InvalidLockListener>,
    locks: DashMap<String, DistributedLock>,
    truncated_keys: AtomicU64,
}

/// Registry of lock handles. Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct LockRegistry {
    state: Arc<RegistryState>,
}

impl LockRegistry {
    pub fn new(
        config: LeaseConfig,
        store: Arc<dyn LockStore>,
        scheduler: Arc<RenewalScheduler>,
        listener: Arc<dyn InvalidLockListener>,
    ) -> Self {
        Self {
            state: Arc::new(RegistryState {
                config,
                store,
                scheduler,
                listener,
                locks: DashMap::new(),
                truncated_keys: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.state.config
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.state.store
    }

    pub fn scheduler(&self) -> &Arc<RenewalScheduler> {
        &self.state.scheduler
    }

    /// The handle for `key`, created on first use.
    ///
    /// Keys longer than `max_key_length` characters are truncated, so two
    /// long keys sharing a prefix get the same handle. Each truncation is
    /// logged and counted in [`truncated_keys`](Self::truncated_keys).
    ///
    /// Fetching counts as a use: the handle's idle time restarts from the
    /// current store time.
    pub fn get_lock(&self, key: &str) -> DistributedLock {
        let key = self.normalize_key(key);
        let state = &self.state;
        let now = match state.store.now() {
            Ok(now) => Some(now),
            Err(e) => {
                debug!(key = %key, "could not read store time for lock lookup: {}", e);
                None
            }
        };

        let entry = state.locks.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "creating lock handle");
            DistributedLock::new(
                key.as_str(),
                &state.config,
                Arc::clone(&state.store),
                Arc::clone(&state.scheduler),
                Arc::clone(&state.listener),
            )
        });
        // Stamped while the entry is locked, so a sweep cannot evict in between
        if let Some(now) = now {
            entry.value().touch(now);
        }
        entry.value().clone()
    }

    fn normalize_key(&self, key: &str) -> String {
        let max = self.state.config.max_key_length;
        match key.char_indices().nth(max) {
            None => key.to_string(),
            Some((cut, _)) => {
                let total = self.state.truncated_keys.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    key = %key,
                    max_key_length = max,
                    truncated_total = total,
                    "lock key too long; truncating (distinct keys with this prefix share one lock)"
                );
                key[..cut].to_string()
            }
        }
    }

    /// Evict handles unused for longer than `idle_timeout` whose key is not
    /// in use anywhere, deleting their store record if it has expired.
    ///
    /// Idle time is measured on the store clock from the last `get_lock` or
    /// acquisition. Entries hitting a transient store error are skipped.
    /// Evicted handles are retired and refuse to lock again. Returns the
    /// number of handles evicted.
    pub fn delete_expired_locks(&self, idle_timeout: Duration) -> Result<usize> {
        sweep(&self.state, idle_timeout)
    }

    /// Run [`delete_expired_locks`](Self::delete_expired_locks) on the
    /// shared scheduler every `idle_eviction_timeout`. The task stops once
    /// every clone of the registry is dropped.
    pub fn schedule_idle_eviction(&self) -> Result<TaskHandle> {
        let period = self.state.config.idle_eviction_timeout();
        let weak: Weak<RegistryState> = Arc::downgrade(&self.state);

        self.state.scheduler.schedule_at_fixed_rate(period, move || {
            let Some(state) = weak.upgrade() else {
                return TickOutcome::Stop;
            };
            match sweep(&state, period) {
                Ok(0) => {}
                Ok(evicted) => debug!(evicted, "idle lock handles evicted"),
                Err(e) => warn!("idle lock sweep failed: {}", e),
            }
            TickOutcome::Continue
        })
    }

    pub fn len(&self) -> usize {
        self.state.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.locks.is_empty()
    }

    /// Keys with a live handle, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.locks.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// How many `get_lock` calls had their key truncated.
    pub fn truncated_keys(&self) -> u64 {
        self.state.truncated_keys.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("owner_id", &self.state.store.owner_id())
            .field("locks", &self.state.locks.len())
            .field("truncated_keys", &self.truncated_keys())
            .finish()
    }
}

fn sweep(state: &RegistryState, idle_timeout: Duration) -> Result<usize> {
    let now = match state.store.now() {
        Ok(now) => now,
        Err(e) if e.is_transient() => {
            warn!("store clock unavailable; skipping idle sweep: {}", e);
            return Ok(0);
        }
        Err(e) => return Err(LeaseError::store(STORE_WIDE_KEY, e)),
    };
    let Some(cutoff) = TimeDelta::from_std(idle_timeout)
        .ok()
        .and_then(|idle| now.checked_sub_signed(idle))
    else {
        return Ok(0);
    };

    // Snapshot so no map shard stays locked across store calls
    let candidates: Vec<(String, DistributedLock)> = state
        .locks
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    let mut evicted = 0;
    for (key, lock) in candidates {
        if lock.stamp_last_used_if_unset(now) >= cutoff {
            continue;
        }

        match lock.is_in_process() {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, "could not check lock usage; keeping handle: {}", e);
                continue;
            }
        }

        match state.store.delete_expired(&key) {
            Ok(deleted) => {
                if deleted {
                    debug!(key = %key, "deleted expired lease record");
                }
            }
            Err(e) if e.is_transient() => {
                warn!(key = %key, "store unavailable; keeping idle handle: {}", e);
                continue;
            }
            Err(e) => return Err(LeaseError::store(&key, e)),
        }

        // Re-checked under the entry lock: a concurrent get_lock or lock wins
        let removed = state.locks.remove_if(&key, |_, current| {
            current.ptr_eq(&lock)
                && current.last_used_at().is_some_and(|at| at < cutoff)
                && current.retire()
        });
        if removed.is_some() {
            debug!(key = %key, "evicted idle lock handle");
            evicted += 1;
        }
    }
    Ok(evicted)
}
