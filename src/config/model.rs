//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every lock handle of a registry.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    // =========================================================================
    // Lease settings
    // =========================================================================
    /// Lease length on the store, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Heartbeat period in milliseconds. Must be smaller than `ttl_ms`,
    /// ideally a small fraction of it so missed heartbeats are tolerated.
    #[serde(default = "default_renewal_interval_ms")]
    pub renewal_interval_ms: u64,

    /// Consecutive renewal failures after which a lock is invalidated.
    #[serde(default = "default_max_consecutive_renew_failures")]
    pub max_consecutive_renew_failures: u32,

    // =========================================================================
    // Local settings
    // =========================================================================
    /// Sleep between failed iterations of a blocking acquisition.
    #[serde(default = "default_local_retry_idle_sleep_ms")]
    pub local_retry_idle_sleep_ms: u64,

    /// Registry handles unused for this long are evicted.
    #[serde(default = "default_idle_eviction_timeout_ms")]
    pub idle_eviction_timeout_ms: u64,

    /// Keys longer than this are truncated. Distinct keys sharing the
    /// same prefix collide.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,

    /// Worker threads driving renewal ticks.
    #[serde(default = "default_renewal_workers")]
    pub renewal_workers: usize,

    // =========================================================================
    // Store settings
    // =========================================================================
    /// Owner id override. Defaults to `user@host:pid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Directory shared by every process using a file-backed store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            renewal_interval_ms: default_renewal_interval_ms(),
            max_consecutive_renew_failures: default_max_consecutive_renew_failures(),
            local_retry_idle_sleep_ms: default_local_retry_idle_sleep_ms(),
            idle_eviction_timeout_ms: default_idle_eviction_timeout_ms(),
            max_key_length: default_max_key_length(),
            renewal_workers: default_renewal_workers(),
            owner_id: None,
            store_dir: None,
        }
    }
}

impl LeaseConfig {
    /// Lease length.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Heartbeat period.
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    /// Sleep between blocking acquisition attempts.
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.local_retry_idle_sleep_ms)
    }

    /// Idle time after which the registry evicts a handle.
    pub fn idle_eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_timeout_ms)
    }
}
