//! RAII guard for a held lease.

use super::DistributedLock;
use crate::error::Result;
use std::marker::PhantomData;
use tracing::warn;

/// Holds one acquisition of a [`DistributedLock`].
///
/// When dropped, the hold is released with [`DistributedLock::unlock`]. If
/// that fails, a warning is logged but no panic occurs.
///
/// The guard is not `Send`: the hold belongs to the thread that acquired
/// it, and only that thread can release it.
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    lock: &'a DistributedLock,

    /// Whether the hold has been released manually.
    released: bool,

    _not_send: PhantomData<*const ()>,
}

impl<'a> LeaseGuard<'a> {
    pub(super) fn new(lock: &'a DistributedLock) -> Self {
        Self {
            lock,
            released: false,
            _not_send: PhantomData,
        }
    }

    pub fn lock(&self) -> &DistributedLock {
        self.lock
    }

    pub fn key(&self) -> &str {
        self.lock.key()
    }

    /// Whether the lease is still ours.
    pub fn is_valid(&self) -> bool {
        self.lock.is_valid()
    }

    /// `Err(Invalidated)` if the lease was lost while held.
    pub fn ensure_valid(&self) -> Result<()> {
        self.lock.ensure_valid()
    }

    /// Release now, reporting errors instead of logging them.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.unlock()
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.lock.unlock()
        {
            warn!(key = self.lock.key(), "failed to release lease: {}", e);
        }
    }
}
