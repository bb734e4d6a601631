//! Error types for leasehold.
//!
//! Store errors are split into [`StoreError::Transient`] and
//! [`StoreError::Terminal`] so that retry-vs-propagate decisions in the lock
//! state machine are plain `match` arms.

use crate::exit_codes;
use thiserror::Error;

/// Failure reported by a [`LockStore`](crate::store::LockStore).
///
/// A mutation that matched no record is not an error; stores return
/// `Ok(false)` for that.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity loss, contention, or a conflicting transaction.
    /// The operation may succeed if retried.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Anything retrying will not fix (corrupt record, permissions, bad key).
    #[error("store error: {0}")]
    Terminal(String),
}

impl StoreError {
    /// Whether the lock state machine should retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classify an I/O error from a filesystem-backed store.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => StoreError::Transient(format!("{}: {}", context, err)),
            _ => StoreError::Terminal(format!("{}: {}", context, err)),
        }
    }
}

/// Key reported by [`LeaseError::Store`] for failures not tied to one lock.
pub const STORE_WIDE_KEY: &str = "*";

/// Main error type for leasehold operations.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// A non-retryable store failure surfaced from acquisition or release.
    #[error("lock '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Acquisition was cancelled through its [`CancelToken`](crate::lock::CancelToken).
    #[error("acquisition of lock '{0}' was interrupted")]
    Interrupted(String),

    /// The handle lost its lease after repeated renewal failures.
    #[error("lock '{0}' is no longer valid: lease renewal failed")]
    Invalidated(String),

    /// The handle was evicted from its registry as idle and must not be
    /// used to acquire again.
    #[error("lock handle for '{0}' was evicted as idle; get a new handle from the registry")]
    Evicted(String),

    /// The lease is held elsewhere and could not be acquired.
    #[error("lock '{0}' is held by another owner")]
    LockUnavailable(String),

    /// The renewal scheduler is shut down or could not start its workers.
    #[error("renewal scheduler error: {0}")]
    Scheduler(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// User provided invalid arguments or the command failed.
    #[error("{0}")]
    UserError(String),
}

impl LeaseError {
    /// Wrap a store error for the given key.
    pub fn store(key: impl Into<String>, source: StoreError) -> Self {
        LeaseError::Store {
            key: key.into(),
            source,
        }
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LeaseError::Store { .. } => exit_codes::STORE_FAILURE,
            LeaseError::Interrupted(_) => exit_codes::LEASE_LOST,
            LeaseError::Invalidated(_) => exit_codes::LEASE_LOST,
            LeaseError::Evicted(_) => exit_codes::USER_ERROR,
            LeaseError::LockUnavailable(_) => exit_codes::LOCK_UNAVAILABLE,
            LeaseError::Scheduler(_) => exit_codes::USER_ERROR,
            LeaseError::Config(_) => exit_codes::USER_ERROR,
            LeaseError::UserError(_) => exit_codes::USER_ERROR,
        }
    }
}

/// Result type alias for leasehold operations.
pub type Result<T> = std::result::Result<T, LeaseError>;
