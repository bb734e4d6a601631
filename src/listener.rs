//! Notification hook for locks that lost their lease.
//!
//! A lock whose heartbeat fails too many times in a row can no longer prove
//! ownership; the store may already have handed the key to another owner.
//! The listener is how the code running the critical section learns about it.

use crate::lock::DistributedLock;
use tracing::error;

/// Receives invalidation events. Called from a renewal worker thread, once
/// per invalidation of a given lock.
pub trait InvalidLockListener: Send + Sync {
    fn notify(&self, lock: &DistributedLock);
}

impl<F> InvalidLockListener for F
where
    F: Fn(&DistributedLock) + Send + Sync,
{
    fn notify(&self, lock: &DistributedLock) {
        self(lock)
    }
}

/// Default listener: records the event in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl InvalidLockListener for LoggingListener {
    fn notify(&self, lock: &DistributedLock) {
        error!(
            key = lock.key(),
            "lease lost after {} consecutive renewal failures",
            lock.consecutive_renew_failures()
        );
    }
}
