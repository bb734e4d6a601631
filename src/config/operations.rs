//! Config loading, validation, and utility operations.

use super::model::LeaseConfig;
use crate::error::{LeaseError, Result};
use std::path::Path;

impl LeaseConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(LeaseConfig)` - Successfully loaded and validated config
    /// * `Err(LeaseError::Config)` - Read error, parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LeaseConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LeaseError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LeaseError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - every duration must be positive
    /// - `renewal_interval_ms` must be smaller than `ttl_ms`
    /// - `max_consecutive_renew_failures`, `max_key_length` and
    ///   `renewal_workers` must be positive
    /// - `owner_id`, when set, must be non-empty
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("ttl_ms", self.ttl_ms),
            ("renewal_interval_ms", self.renewal_interval_ms),
            ("local_retry_idle_sleep_ms", self.local_retry_idle_sleep_ms),
            ("idle_eviction_timeout_ms", self.idle_eviction_timeout_ms),
            (
                "max_consecutive_renew_failures",
                self.max_consecutive_renew_failures as u64,
            ),
            ("max_key_length", self.max_key_length as u64),
            ("renewal_workers", self.renewal_workers as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(LeaseError::Config(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        if self.renewal_interval_ms >= self.ttl_ms {
            return Err(LeaseError::Config(format!(
                "config validation failed: renewal_interval_ms ({}) must be smaller than ttl_ms ({})",
                self.renewal_interval_ms, self.ttl_ms
            )));
        }

        if let Some(owner) = &self.owner_id
            && owner.trim().is_empty()
        {
            return Err(LeaseError::Config(
                "config validation failed: owner_id must be non-empty when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of heartbeats that can be missed before the lease lapses.
    pub fn tolerated_missed_heartbeats(&self) -> u64 {
        (self.ttl_ms / self.renewal_interval_ms).saturating_sub(1)
    }
}
