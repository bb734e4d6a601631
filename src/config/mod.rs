//! Configuration model for leasehold.
//!
//! This module defines the [`LeaseConfig`] struct that is usually loaded from a
//! `leasehold.yaml` file. It supports forward-compatible YAML parsing (unknown
//! fields are ignored), sensible defaults for optional fields, and validation
//! of config values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::LeaseConfig;
