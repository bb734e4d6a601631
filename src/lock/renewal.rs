//! Heartbeat task keeping a held lease alive.

use super::{DistributedLock, Inner, RenewalTask};
use crate::error::Result;
use crate::scheduler::TickOutcome;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

impl DistributedLock {
    /// Schedule the heartbeat unless one is already running.
    pub(super) fn ensure_renewal(&self) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.renewal.lock();
        if slot.as_ref().is_some_and(|task| task.handle.is_active()) {
            return Ok(());
        }

        let generation = inner.renewal_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(inner);
        let handle = inner
            .scheduler
            .schedule_at_fixed_rate(inner.renew_interval, move || renewal_tick(&weak, generation))?;

        debug!(key = %inner.key, generation, "renewal scheduled");
        *slot = Some(RenewalTask { generation, handle });
        Ok(())
    }

    /// Stop the heartbeat. A tick already in flight sees the generation
    /// change and leaves the lock alone.
    pub(super) fn cancel_renewal(&self) {
        let inner = &self.inner;
        let mut slot = inner.renewal.lock();
        inner.renewal_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = slot.take() {
            task.handle.cancel();
            debug!(key = %inner.key, generation = task.generation, "renewal cancelled");
        }
    }
}

fn renewal_tick(weak: &Weak<Inner>, generation: u64) -> TickOutcome {
    let Some(inner) = weak.upgrade() else {
        return TickOutcome::Stop;
    };
    let current = || inner.renewal_generation.load(Ordering::SeqCst) == generation;
    if !current() {
        return TickOutcome::Stop;
    }

    let result = inner.store.update_expiry(&inner.key, inner.ttl);
    if !current() {
        // Released or re-acquired while the store call was in flight
        return TickOutcome::Stop;
    }

    let reason = match result {
        Ok(true) => {
            inner.renew_failures.store(0, Ordering::SeqCst);
            trace!(key = %inner.key, "lease renewed");
            return TickOutcome::Continue;
        }
        Ok(false) => "lease is no longer held by this owner".to_string(),
        Err(e) => e.to_string(),
    };

    let failures = inner.renew_failures.fetch_add(1, Ordering::SeqCst) + 1;
    warn!(
        key = %inner.key,
        failures,
        max = inner.max_renew_failures,
        "lease renewal failed: {}",
        reason
    );
    if failures < inner.max_renew_failures {
        return TickOutcome::Continue;
    }

    invalidate(inner, generation);
    TickOutcome::Stop
}

fn invalidate(inner: Arc<Inner>, generation: u64) {
    inner.valid.store(false, Ordering::SeqCst);
    {
        let mut slot = inner.renewal.lock();
        if slot.as_ref().is_some_and(|task| task.generation == generation) {
            *slot = None;
        }
    }

    if inner.notified.swap(true, Ordering::SeqCst) {
        return;
    }
    warn!(key = %inner.key, "lease invalidated; notifying listener");

    let listener = Arc::clone(&inner.listener);
    listener.notify(&DistributedLock { inner });
}
