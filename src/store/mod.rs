//! Lock store contract and implementations.
//!
//! The store is the single source of truth for lease ownership. Everything a
//! [`DistributedLock`](crate::lock::DistributedLock) knows about who holds a
//! key comes from here, including the time.
//!
//! # Contract
//!
//! - At most one record per key.
//! - Conditional mutations (`update`, `update_expiry`, `delete`,
//!   `delete_expired`) check their condition and apply the change
//!   atomically with respect to every other caller. Two owners racing to
//!   steal the same expired lease must not both succeed.
//! - Mutations report whether they took effect. "No record matched" is
//!   `Ok(false)`, never an error.
//! - [`LockStore::now`] is the store's clock. Callers must not substitute a
//!   local clock.
//!
//! # Implementations
//!
//! - [`MemoryLockStore`]: records shared between in-process views, one view
//!   per owner id. Used for tests and embedding.
//! - [`FileLockStore`]: records in a directory shared between processes.

mod clock;
mod file;
mod memory;
mod types;

#[cfg(test)]
mod tests;

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use clock::{ManualClock, StoreClock, SystemClock};
pub use file::FileLockStore;
pub use memory::{MemoryBackend, MemoryLockStore};
pub use types::{LockRecord, LockStatus, expiry_after};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD over lease records for one owner, plus the store clock.
pub trait LockStore: Send + Sync {
    /// Owner id written into records created by this store view.
    fn owner_id(&self) -> &str;

    /// Store-relative current time.
    fn now(&self) -> StoreResult<DateTime<Utc>>;

    /// Read the record for `key`, if any.
    fn fetch(&self, key: &str) -> StoreResult<Option<LockRecord>>;

    /// Insert a record owned by this owner. `false` if one already exists.
    fn create(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Take over or extend the record: succeeds only if the current record
    /// is owned by this owner or is expired. Sets owner and expiry.
    fn update(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Heartbeat: extend the expiry of a record owned by this owner.
    /// Never changes ownership.
    fn update_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Whether a live (unexpired) record exists for `key`, whoever owns it.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete the record if it is owned by this owner.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete the record if it is expired, whoever owns it.
    fn delete_expired(&self, key: &str) -> StoreResult<bool>;

    /// Every record in the store.
    fn records(&self) -> StoreResult<Vec<LockRecord>>;

    /// Ownership of `key` as seen by this owner.
    fn status(&self, key: &str) -> StoreResult<LockStatus> {
        let record = self.fetch(key)?;
        let now = self.now()?;
        Ok(LockStatus::of(record.as_ref(), self.owner_id(), now))
    }
}
