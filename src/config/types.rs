//! Configuration defaults for leasehold.
//!
//! Default value functions used by serde when a field is absent.

/// Maximum number of characters kept from a lock key.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 100;

/// Renewal failures in a row after which a lock is invalidated.
pub const DEFAULT_MAX_CONSECUTIVE_RENEW_FAILURES: u32 = 3;

/// Name of the config file looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "leasehold.yaml";

// Default value functions for serde
pub(crate) fn default_ttl_ms() -> u64 {
    30_000
}
pub(crate) fn default_renewal_interval_ms() -> u64 {
    10_000
}
pub(crate) fn default_idle_eviction_timeout_ms() -> u64 {
    600_000
}
pub(crate) fn default_local_retry_idle_sleep_ms() -> u64 {
    100
}
pub(crate) fn default_max_consecutive_renew_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_RENEW_FAILURES
}
pub(crate) fn default_max_key_length() -> usize {
    DEFAULT_MAX_KEY_LENGTH
}
pub(crate) fn default_renewal_workers() -> usize {
    1
}
