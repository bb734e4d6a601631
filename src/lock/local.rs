//! Reentrant, thread-owned mutex gating remote operations on one key.
//!
//! Unlike a guard-based mutex, acquisition and release are separate calls,
//! and release by a thread that is not the owner is reported instead of
//! being undefined. That is what lets `DistributedLock::unlock` treat misuse
//! as a logged no-op.

use super::cancel::CancelToken;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    holds: u32,
    retired: bool,
}

/// How the calling thread got the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// The mutex was free; the caller now holds it once.
    First,
    /// The caller already held it; the hold count went up.
    Reentered,
    /// The mutex was retired and can no longer be taken.
    Retired,
}

#[derive(Debug, Default)]
pub(crate) struct LocalMutex {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl LocalMutex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread holds the mutex.
    pub(crate) fn lock(&self) -> Entry {
        loop {
            let entry = self.acquire_with(|state| {
                self.released.wait(state);
                true
            });
            if let Some(entry) = entry {
                return entry;
            }
        }
    }

    /// Take the mutex only if it is free or already ours.
    pub(crate) fn try_lock(&self) -> Option<Entry> {
        self.acquire_with(|_| false)
    }

    /// Wait for the mutex until `deadline`.
    pub(crate) fn try_lock_until(&self, deadline: Instant) -> Option<Entry> {
        self.acquire_with(|state| {
            if Instant::now() >= deadline {
                return false;
            }
            self.released.wait_until(state, deadline);
            true
        })
    }

    /// Wait for the mutex until it is free or `token` is cancelled. The
    /// token is polled every `poll`.
    pub(crate) fn lock_cancellable(&self, token: &CancelToken, poll: Duration) -> Option<Entry> {
        self.acquire_with(|state| {
            if token.is_cancelled() {
                return false;
            }
            self.released.wait_for(state, poll);
            !token.is_cancelled()
        })
    }

    fn acquire_with(
        &self,
        mut wait: impl FnMut(&mut MutexGuard<'_, Ownership>) -> bool,
    ) -> Option<Entry> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.retired {
                return Some(Entry::Retired);
            }
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.holds = 1;
                    return Some(Entry::First);
                }
                Some(owner) if owner == me => {
                    state.holds += 1;
                    return Some(Entry::Reentered);
                }
                Some(_) => {
                    if !wait(&mut state) {
                        return None;
                    }
                }
            }
        }
    }

    /// Drop one hold. Returns `false` if the calling thread is not the owner.
    pub(crate) fn release(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return false;
        }

        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            drop(state);
            // Timed and cancellable waiters may give up after being woken
            self.released.notify_all();
        }
        true
    }

    /// Holds of the calling thread, `None` if it is not the owner.
    pub(crate) fn holds_by_current_thread(&self) -> Option<u32> {
        let state = self.state.lock();
        (state.owner == Some(thread::current().id())).then_some(state.holds)
    }

    /// Held by any thread.
    pub(crate) fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Permanently refuse further acquisitions, but only if nobody holds the
    /// mutex right now. Returns whether the mutex is retired.
    pub(crate) fn retire(&self) -> bool {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            return false;
        }
        state.retired = true;
        true
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.state.lock().retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentry_counts_holds() {
        let mutex = LocalMutex::new();

        assert_eq!(mutex.lock(), Entry::First);
        assert_eq!(mutex.lock(), Entry::Reentered);
        assert_eq!(mutex.try_lock(), Some(Entry::Reentered));
        assert_eq!(mutex.holds_by_current_thread(), Some(3));

        assert!(mutex.release());
        assert!(mutex.release());
        assert!(mutex.is_locked());
        assert!(mutex.release());
        assert!(!mutex.is_locked());
        assert_eq!(mutex.holds_by_current_thread(), None);
    }

    #[test]
    fn test_release_by_non_owner_is_refused() {
        let mutex = Arc::new(LocalMutex::new());
        mutex.lock();

        let other = Arc::clone(&mutex);
        let released = thread::spawn(move || other.release()).join().unwrap();

        assert!(!released);
        assert_eq!(mutex.holds_by_current_thread(), Some(1));
        assert!(mutex.release());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let mutex = Arc::new(LocalMutex::new());
        mutex.lock();

        let other = Arc::clone(&mutex);
        let entry = thread::spawn(move || other.try_lock()).join().unwrap();
        assert_eq!(entry, None);
    }

    #[test]
    fn test_try_lock_until_times_out() {
        let mutex = Arc::new(LocalMutex::new());
        mutex.lock();

        let other = Arc::clone(&mutex);
        let started = Instant::now();
        let entry = thread::spawn(move || {
            other.try_lock_until(Instant::now() + Duration::from_millis(50))
        })
        .join()
        .unwrap();

        assert_eq!(entry, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let mutex = Arc::new(LocalMutex::new());
        mutex.lock();

        let other = Arc::clone(&mutex);
        let waiter = thread::spawn(move || {
            let entry = other.try_lock_until(Instant::now() + Duration::from_secs(5));
            other.release();
            entry
        });

        thread::sleep(Duration::from_millis(20));
        mutex.release();
        assert_eq!(waiter.join().unwrap(), Some(Entry::First));
    }

    #[test]
    fn test_retire_only_when_free() {
        let mutex = LocalMutex::new();
        mutex.lock();
        assert!(!mutex.retire());
        assert!(!mutex.is_retired());

        assert!(mutex.release());
        assert!(mutex.retire());
        assert_eq!(mutex.lock(), Entry::Retired);
        assert_eq!(mutex.try_lock(), Some(Entry::Retired));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_cancellable_wait_observes_token() {
        let mutex = Arc::new(LocalMutex::new());
        mutex.lock();

        let token = CancelToken::new();
        let other = Arc::clone(&mutex);
        let waiter_token = token.clone();
        let waiter = thread::spawn(move || {
            other.lock_cancellable(&waiter_token, Duration::from_millis(5))
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(mutex.holds_by_current_thread(), Some(1));
    }
}
