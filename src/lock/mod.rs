//! Lease-based distributed mutex.
//!
//! A [`DistributedLock`] guards one key across processes. Ownership lives in
//! a [`LockStore`]; this handle drives the state machine against it:
//!
//! 1. **Local serialization**: a reentrant, thread-owned mutex per key. Only
//!    the thread holding it talks to the store for this key, and re-entry by
//!    the holder never touches the store.
//! 2. **Acquisition**: read the key's [`LockStatus`], then `create` a missing
//!    record or conditionally `update` one that is ours or expired. A live
//!    foreign lease means "not this time". Transient store errors are logged
//!    and retried; anything else releases the local mutex and is returned.
//! 3. **Renewal**: while held, a task on the shared [`RenewalScheduler`]
//!    extends the lease every `renew_interval`. After
//!    `max_consecutive_renew_failures` failed heartbeats in a row the handle
//!    is invalidated, the task stops, and the [`InvalidLockListener`] is
//!    notified once.
//! 4. **Release**: the outermost `unlock` cancels renewal, deletes the record
//!    (skipped for an invalidated handle, whose record may belong to someone
//!    else by now) and frees the local mutex.
//!
//! Handles are cheap to clone; clones share all state. Handles are normally
//! obtained from a [`LockRegistry`](crate::registry::LockRegistry).

mod acquire;
mod cancel;
mod guard;
mod local;
mod release;
mod renewal;


pub use cancel::CancelToken;
pub use guard::LeaseGuard;

use crate::config::LeaseConfig;
use crate::error::{LeaseError, Result};
use crate::listener::InvalidLockListener;
use crate::scheduler::{RenewalScheduler, TaskHandle};
use crate::store::{LockStatus, LockStore};
use chrono::{DateTime, Utc};
use local::LocalMutex;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// The renewal task currently attached to a lock.
struct RenewalTask {
    generation: u64,
    handle: TaskHandle,
}

struct Inner {
    key: String,
    ttl: Duration,
    renew_interval: Duration,
    idle_sleep: Duration,
    max_renew_failures: u32,

    store: Arc<dyn LockStore>,
    scheduler: Arc<RenewalScheduler>,
    listener: Arc<dyn InvalidLockListener>,

    local: LocalMutex,
    valid: AtomicBool,
    /// Set once the listener has been told about the current invalidation.
    notified: AtomicBool,
    renew_failures: AtomicU32,
    /// Bumped whenever a renewal task is scheduled or cancelled; a tick
    /// from an older generation stops without touching state.
    renewal_generation: AtomicU64,
    renewal: Mutex<Option<RenewalTask>>,
    /// Store time of the last successful acquisition.
    last_used_at: Mutex<Option<DateTime<Utc>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.renewal.get_mut().take() {
            task.handle.cancel();
        }
    }
}

/// Client-side handle for one lease key.
#[derive(Clone)]
pub struct DistributedLock {
    inner: Arc<Inner>,
}

impl DistributedLock {
    /// Create a handle for `key` (used as is; the registry is responsible
    /// for key normalization).
    pub fn new(
        key: impl Into<String>,
        config: &LeaseConfig,
        store: Arc<dyn LockStore>,
        scheduler: Arc<RenewalScheduler>,
        listener: Arc<dyn InvalidLockListener>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: key.into(),
                ttl: config.ttl(),
                renew_interval: config.renewal_interval(),
                idle_sleep: config.idle_sleep(),
                max_renew_failures: config.max_consecutive_renew_failures.max(1),
                store,
                scheduler,
                listener,
                local: LocalMutex::new(),
                valid: AtomicBool::new(true),
                notified: AtomicBool::new(false),
                renew_failures: AtomicU32::new(0),
                renewal_generation: AtomicU64::new(0),
                renewal: Mutex::new(None),
                last_used_at: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn renew_interval(&self) -> Duration {
        self.inner.renew_interval
    }

    /// False once renewal has failed too often; a fresh outermost
    /// acquisition makes the handle valid again.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    /// `Err(Invalidated)` if the lease was lost. For use inside a critical
    /// section before doing anything that requires ownership.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(LeaseError::Invalidated(self.inner.key.clone()))
        }
    }

    pub fn consecutive_renew_failures(&self) -> u32 {
        self.inner.renew_failures.load(Ordering::SeqCst)
    }

    /// Store time of the last successful acquisition.
    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_used_at.lock()
    }

    /// Set `last_used_at` if the handle has never been acquired, so idle
    /// time of unused handles is measured from when they were first seen.
    pub(crate) fn stamp_last_used_if_unset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        *self.inner.last_used_at.lock().get_or_insert(now)
    }

    /// Record a use at store time `now`. Never moves `last_used_at` back.
    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        let mut last_used = self.inner.last_used_at.lock();
        if last_used.is_none_or(|at| at < now) {
            *last_used = Some(now);
        }
    }

    /// Refuse all further acquisitions if no thread holds the lock.
    /// Called by the registry when it evicts the handle.
    pub(crate) fn retire(&self) -> bool {
        self.inner.local.retire()
    }

    /// Whether the handle was evicted from its registry. A retired handle
    /// fails every acquisition with `Evicted`.
    pub fn is_retired(&self) -> bool {
        self.inner.local.is_retired()
    }

    /// Hold count of the calling thread (0 if it does not hold the lock).
    pub fn hold_count(&self) -> u32 {
        self.inner.local.holds_by_current_thread().unwrap_or(0)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.inner.local.holds_by_current_thread().is_some()
    }

    /// Held by some thread of this process.
    pub fn is_locked(&self) -> bool {
        self.inner.local.is_locked()
    }

    /// Whether a heartbeat task is currently scheduled for this handle.
    pub fn has_active_renewal(&self) -> bool {
        self.inner
            .renewal
            .lock()
            .as_ref()
            .is_some_and(|task| task.handle.is_active())
    }

    /// Whether the key may still be in use: held by a thread of this
    /// process, or a live lease for it exists in the store (whoever owns
    /// it). The registry only evicts handles for which this is false.
    pub fn is_in_process(&self) -> Result<bool> {
        if self.is_locked() {
            return Ok(true);
        }
        self.inner
            .store
            .exists(&self.inner.key)
            .map_err(|e| LeaseError::store(&self.inner.key, e))
    }

    /// Ownership of the key as currently seen by the store.
    pub fn status(&self) -> Result<LockStatus> {
        self.inner
            .store
            .status(&self.inner.key)
            .map_err(|e| LeaseError::store(&self.inner.key, e))
    }

    /// Whether both handles share the same state.
    pub fn ptr_eq(&self, other: &DistributedLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.inner.key)
            .field("owner_id", &self.inner.store.owner_id())
            .field("valid", &self.is_valid())
            .field("locked", &self.is_locked())
            .field("renew_failures", &self.consecutive_renew_failures())
            .finish()
    }
}
