//! `unlock`, which gives the lease back on the outermost release.

use super::DistributedLock;
use crate::error::{LeaseError, Result};
use std::thread;
use tracing::{debug, warn};

impl DistributedLock {
    /// Drop one hold of the calling thread.
    ///
    /// The outermost release stops renewal, deletes the store record and
    /// frees the local mutex. The record is left alone if the handle was
    /// invalidated, since the key may belong to another owner by now.
    /// Transient delete failures are retried; a terminal one is returned
    /// after the local mutex has been released.
    ///
    /// Calling this from a thread that does not hold the lock is logged and
    /// otherwise ignored.
    pub fn unlock(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(holds) = inner.local.holds_by_current_thread() else {
            warn!(
                key = %inner.key,
                thread = ?thread::current().id(),
                "unlock called by a thread that does not hold the lock"
            );
            return Ok(());
        };

        if holds > 1 {
            inner.local.release();
            return Ok(());
        }

        self.cancel_renewal();
        let result = if self.is_valid() {
            self.delete_remote()
        } else {
            debug!(key = %inner.key, "lock invalidated; leaving store record alone");
            Ok(())
        };

        inner.local.release();
        result
    }

    fn delete_remote(&self) -> Result<()> {
        let inner = &self.inner;
        loop {
            match inner.store.delete(&inner.key) {
                Ok(true) => {
                    debug!(key = %inner.key, "lease released");
                    return Ok(());
                }
                Ok(false) => {
                    warn!(key = %inner.key, "lease record was already gone or taken over on release");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(key = %inner.key, "store unavailable while releasing lease, retrying: {}", e);
                    thread::sleep(inner.idle_sleep);
                }
                Err(e) => return Err(LeaseError::store(&inner.key, e)),
            }
        }
    }
}
