//! Lease record and derived status.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A lease as persisted by the store. At most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The (already truncated) lock key.
    pub key: String,

    /// Store-clock instant after which the lease is void.
    pub expires_at: DateTime<Utc>,

    /// Id of the process holding the lease.
    pub owner_id: String,
}

impl LockRecord {
    /// A record for `owner_id` expiring `ttl` after `now`.
    pub fn new(key: &str, owner_id: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            expires_at: expiry_after(now, ttl),
            owner_id: owner_id.to_string(),
        }
    }

    /// Whether the lease has lapsed at store time `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the record belongs to `owner_id`.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    /// Time left on the lease, zero when expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Ownership of a key, seen from one owner at one store instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    NotExist,
    HeldByMe,
    HeldByMeExpired,
    HeldByOther,
    HeldByOtherExpired,
}

impl LockStatus {
    /// Derive the status of `record` for `owner_id` at store time `now`.
    pub fn of(record: Option<&LockRecord>, owner_id: &str, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return LockStatus::NotExist;
        };

        match (record.is_owned_by(owner_id), record.is_expired(now)) {
            (true, false) => LockStatus::HeldByMe,
            (true, true) => LockStatus::HeldByMeExpired,
            (false, false) => LockStatus::HeldByOther,
            (false, true) => LockStatus::HeldByOtherExpired,
        }
    }

    /// A live lease owned by somebody else.
    pub fn is_held_by_other(&self) -> bool {
        matches!(self, LockStatus::HeldByOther)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::NotExist => "NOT_EXIST",
            LockStatus::HeldByMe => "HELD_BY_ME",
            LockStatus::HeldByMeExpired => "HELD_BY_ME_EXPIRED",
            LockStatus::HeldByOther => "HELD_BY_OTHER",
            LockStatus::HeldByOtherExpired => "HELD_BY_OTHER_EXPIRED",
        }
    }
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `now + ttl`, saturating at the largest representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
