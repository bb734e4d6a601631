//! Acquisition variants and the remote attempt loop.

use super::local::Entry;
use super::{CancelToken, DistributedLock, LeaseGuard};
use crate::error::{LeaseError, Result, StoreError};
use crate::store::LockStatus;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on how long a cancellable wait goes without checking its token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Result of one remote iteration.
enum Attempt {
    Acquired,
    /// A live lease belongs to someone else, or a conditional write lost a race.
    Busy,
    /// The store reported a transient error.
    Retry,
}

impl DistributedLock {
    /// Block until the lease is acquired.
    ///
    /// Transient store errors are retried indefinitely. A terminal store
    /// error releases the local mutex and is returned.
    pub fn lock(&self) -> Result<()> {
        match self.inner.local.lock() {
            Entry::Retired => Err(self.evicted()),
            Entry::Reentered => self.reenter(),
            Entry::First => {
                let idle_sleep = self.inner.idle_sleep;
                self.acquire_remote(|| {
                    thread::sleep(idle_sleep);
                    Ok(true)
                })
                .map(|_| ())
            }
        }
    }

    /// One acquisition attempt. `Ok(false)` if the local mutex is held by
    /// another thread, the lease is held elsewhere, or the store had a
    /// transient failure.
    pub fn try_lock(&self) -> Result<bool> {
        match self.inner.local.try_lock() {
            None => Ok(false),
            Some(Entry::Retired) => Err(self.evicted()),
            Some(Entry::Reentered) => self.reenter().map(|_| true),
            Some(Entry::First) => self.acquire_remote(|| Ok(false)),
        }
    }

    /// Like [`try_lock`](Self::try_lock), but waits up to `wait` for the
    /// local mutex and keeps retrying the store until the bound elapses.
    pub fn try_lock_for(&self, wait: Duration) -> Result<bool> {
        let Some(deadline) = Instant::now().checked_add(wait) else {
            return self.lock().map(|_| true);
        };
        match self.inner.local.try_lock_until(deadline) {
            None => Ok(false),
            Some(Entry::Retired) => Err(self.evicted()),
            Some(Entry::Reentered) => self.reenter().map(|_| true),
            Some(Entry::First) => {
                let idle_sleep = self.inner.idle_sleep;
                self.acquire_remote(|| {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    thread::sleep(idle_sleep.min(remaining));
                    Ok(true)
                })
            }
        }
    }

    /// Block until the lease is acquired or `token` is cancelled, in which
    /// case the local mutex is released and `Interrupted` is returned.
    pub fn lock_interruptibly(&self, token: &CancelToken) -> Result<()> {
        let interrupted = || LeaseError::Interrupted(self.inner.key.clone());
        if token.is_cancelled() {
            return Err(interrupted());
        }

        let poll = self.inner.idle_sleep.min(CANCEL_POLL);
        match self.inner.local.lock_cancellable(token, poll) {
            None => Err(interrupted()),
            Some(Entry::Retired) => Err(self.evicted()),
            Some(Entry::Reentered) => self.reenter(),
            Some(Entry::First) => {
                let idle_sleep = self.inner.idle_sleep;
                self.acquire_remote(|| {
                    if token.wait_timeout(idle_sleep) {
                        return Err(interrupted());
                    }
                    Ok(true)
                })
                .map(|_| ())
            }
        }
    }

    /// [`lock`](Self::lock), returning a guard that unlocks on drop.
    pub fn acquire(&self) -> Result<LeaseGuard<'_>> {
        self.lock()?;
        Ok(LeaseGuard::new(self))
    }

    /// [`try_lock`](Self::try_lock), returning a guard on success.
    pub fn try_acquire(&self) -> Result<Option<LeaseGuard<'_>>> {
        Ok(self.try_lock()?.then(|| LeaseGuard::new(self)))
    }

    /// [`try_lock_for`](Self::try_lock_for), returning a guard on success.
    pub fn try_acquire_for(&self, wait: Duration) -> Result<Option<LeaseGuard<'_>>> {
        Ok(self.try_lock_for(wait)?.then(|| LeaseGuard::new(self)))
    }

    /// [`lock_interruptibly`](Self::lock_interruptibly), returning a guard.
    pub fn acquire_interruptibly(&self, token: &CancelToken) -> Result<LeaseGuard<'_>> {
        self.lock_interruptibly(token)?;
        Ok(LeaseGuard::new(self))
    }

    /// The calling thread already holds the lease. Re-entry on a handle that
    /// lost its lease is refused and the extra hold undone.
    fn reenter(&self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        self.inner.local.release();
        Err(LeaseError::Invalidated(self.inner.key.clone()))
    }

    fn evicted(&self) -> LeaseError {
        LeaseError::Evicted(self.inner.key.clone())
    }

    /// Run remote attempts with the local mutex held once. Between
    /// unsuccessful attempts `wait` is called: `Ok(true)` tries again,
    /// `Ok(false)` gives up, `Err` aborts. The local mutex is released
    /// whenever this does not return `Ok(true)`.
    fn acquire_remote(&self, mut wait: impl FnMut() -> Result<bool>) -> Result<bool> {
        let result = loop {
            match self.attempt() {
                Ok(Attempt::Acquired) => break Ok(true),
                Ok(Attempt::Busy | Attempt::Retry) => match wait() {
                    Ok(true) => continue,
                    Ok(false) => break Ok(false),
                    Err(e) => break Err(e),
                },
                Err(e) => break Err(e),
            }
        };

        if !matches!(result, Ok(true)) {
            self.inner.local.release();
        }
        result
    }

    fn attempt(&self) -> Result<Attempt> {
        let key = &self.inner.key;
        match self.try_remote() {
            Ok(true) => {
                self.on_acquired()?;
                Ok(Attempt::Acquired)
            }
            Ok(false) => Ok(Attempt::Busy),
            Err(e) if e.is_transient() => {
                warn!(key = %key, "store unavailable while acquiring lease, retrying: {}", e);
                Ok(Attempt::Retry)
            }
            Err(e) => Err(LeaseError::store(key, e)),
        }
    }

    fn try_remote(&self) -> std::result::Result<bool, StoreError> {
        let store = &self.inner.store;
        let key = &self.inner.key;
        let ttl = self.inner.ttl;

        let status = store.status(key)?;
        let acquired = match status {
            LockStatus::HeldByOther => false,
            LockStatus::NotExist => store.create(key, ttl)?,
            LockStatus::HeldByMe | LockStatus::HeldByMeExpired | LockStatus::HeldByOtherExpired => {
                store.update(key, ttl)?
            }
        };

        if acquired {
            debug!(key = %key, %status, "lease acquired");
        }
        Ok(acquired)
    }

    /// Bookkeeping after the store granted the lease.
    fn on_acquired(&self) -> Result<()> {
        let inner = &self.inner;
        inner.renew_failures.store(0, Ordering::SeqCst);
        inner.valid.store(true, Ordering::SeqCst);
        inner.notified.store(false, Ordering::SeqCst);

        match inner.store.now() {
            Ok(now) => *inner.last_used_at.lock() = Some(now),
            Err(e) => debug!(key = %inner.key, "could not read store time after acquisition: {}", e),
        }

        if let Err(e) = self.ensure_renewal() {
            // Without a heartbeat the lease would lapse under the caller
            if let Err(delete_err) = inner.store.delete(&inner.key) {
                warn!(key = %inner.key, "failed to give back unrenewable lease: {}", delete_err);
            }
            return Err(e);
        }
        Ok(())
    }
}
