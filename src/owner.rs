//! Owner identity for lease records.
//!
//! Every record in the store carries the id of the process that holds it.
//! The id must be stable for the lifetime of the process and distinct from
//! every other process sharing the store.

/// Supplies the owner id written into lease records.
pub trait OwnerIdProvider: Send + Sync {
    /// The id of this process.
    fn owner_id(&self) -> String;
}

/// Owner id derived from the environment: `user@host:pid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostOwnerId;

impl OwnerIdProvider for HostOwnerId {
    fn owner_id(&self) -> String {
        get_owner_string()
    }
}

/// A fixed owner id, for tests and for deployments that assign ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedOwnerId(pub String);

impl FixedOwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl OwnerIdProvider for FixedOwnerId {
    fn owner_id(&self) -> String {
        self.0.clone()
    }
}

/// Get the owner string for this process.
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}:{}", user, host, std::process::id())
}
