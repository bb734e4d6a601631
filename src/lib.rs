//! Leasehold: lease-based distributed mutex backed by a shared record store.
//!
//! Processes coordinate through a [`LockStore`](store::LockStore) holding one
//! record per key: who owns it and until when. A
//! [`DistributedLock`](lock::DistributedLock) acquires the record, keeps it
//! alive with heartbeats on a shared [`RenewalScheduler`](scheduler::RenewalScheduler),
//! and releases it. If heartbeats keep failing the lock is invalidated and an
//! [`InvalidLockListener`](listener::InvalidLockListener) is told. A crashed
//! holder stops heartbeating, its lease expires, and another owner takes over.
//!
//! ```no_run
//! use leasehold::config::LeaseConfig;
//! use leasehold::listener::LoggingListener;
//! use leasehold::registry::LockRegistry;
//! use leasehold::scheduler::RenewalScheduler;
//! use leasehold::store::FileLockStore;
//! use std::sync::Arc;
//!
//! # fn main() -> leasehold::error::Result<()> {
//! let config = LeaseConfig::default();
//! let store = FileLockStore::open("/var/lib/leases", "worker-1")
//!     .map_err(|e| leasehold::error::LeaseError::store(leasehold::error::STORE_WIDE_KEY, e))?;
//! let scheduler = Arc::new(RenewalScheduler::new(config.renewal_workers)?);
//! let registry = LockRegistry::new(config, Arc::new(store), scheduler, Arc::new(LoggingListener));
//!
//! let lock = registry.get_lock("nightly-report");
//! let guard = lock.acquire()?;
//! // critical section
//! guard.ensure_valid()?;
//! guard.release()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod listener;
pub mod lock;
pub mod owner;
pub mod registry;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{LeaseError, Result, StoreError};
pub use lock::{CancelToken, DistributedLock, LeaseGuard};
pub use registry::LockRegistry;
