//! Command implementations for leasehold.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, and the [`Session`] every command runs against: the
//! resolved config, the file store, and a lock registry over it.

mod inspect;
mod run;

use crate::cli::{Cli, Command, GlobalArgs};
use chrono::{DateTime, Utc};
use leasehold::config::LeaseConfig;
use leasehold::config::types::DEFAULT_CONFIG_FILE;
use leasehold::error::{LeaseError, Result, STORE_WIDE_KEY};
use leasehold::listener::LoggingListener;
use leasehold::owner::{HostOwnerId, OwnerIdProvider};
use leasehold::registry::LockRegistry;
use leasehold::scheduler::RenewalScheduler;
use leasehold::store::{FileLockStore, LockStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.global)?;
    match cli.command {
        Command::Status(args) => inspect::cmd_status(&session, &args.key),
        Command::List => inspect::cmd_list(&session),
        Command::Run(args) => run::cmd_run(&session, args),
        Command::Clear(args) => inspect::cmd_clear(&session, &args.key, args.force),
        Command::Sweep => inspect::cmd_sweep(&session),
    }
}

/// Everything a command needs to talk to the store.
pub(crate) struct Session {
    pub store: Arc<FileLockStore>,
    pub registry: LockRegistry,
}

impl Session {
    pub(crate) fn open(global: &GlobalArgs) -> Result<Self> {
        let config = resolve_config(global)?;

        let store_dir = config.store_dir.clone().ok_or_else(|| {
            LeaseError::UserError(
                "no store directory configured.\n\n\
                 Pass --store-dir <dir> or set `store_dir` in leasehold.yaml."
                    .to_string(),
            )
        })?;
        let owner_id = config
            .owner_id
            .clone()
            .unwrap_or_else(|| HostOwnerId.owner_id());
        debug!(store = %store_dir.display(), owner = %owner_id, "opening lease store");

        let store = FileLockStore::open(&store_dir, owner_id)
            .map_err(|e| LeaseError::store(STORE_WIDE_KEY, e))?;
        let store = Arc::new(store);

        let scheduler = Arc::new(RenewalScheduler::new(config.renewal_workers)?);
        let registry = LockRegistry::new(
            config,
            Arc::clone(&store) as Arc<dyn LockStore>,
            scheduler,
            Arc::new(LoggingListener),
        );

        Ok(Self { store, registry })
    }

    pub(crate) fn owner_id(&self) -> &str {
        self.store.owner_id()
    }

    /// Store time, for rendering record ages.
    pub(crate) fn now(&self) -> Result<DateTime<Utc>> {
        self.store
            .now()
            .map_err(|e| LeaseError::store(STORE_WIDE_KEY, e))
    }
}

/// Load the config file (explicit, or `leasehold.yaml` if present), then
/// apply command-line overrides and validate the result.
fn resolve_config(global: &GlobalArgs) -> Result<LeaseConfig> {
    let mut config = match &global.config {
        Some(path) => LeaseConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => LeaseConfig::load(DEFAULT_CONFIG_FILE)?,
        None => LeaseConfig::default(),
    };

    if let Some(dir) = &global.store_dir {
        config.store_dir = Some(dir.clone());
    }
    if let Some(owner) = &global.owner_id {
        config.owner_id = Some(owner.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Render a duration as a short human-readable string.
pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{}s", secs, d.subsec_millis() / 100)
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use std::path::PathBuf;

    /// Global options pointing at `dir` as `owner`.
    pub(crate) fn global(dir: &Path, owner: &str) -> GlobalArgs {
        GlobalArgs {
            store_dir: Some(PathBuf::from(dir)),
            config: None,
            owner_id: Some(owner.to_string()),
        }
    }

    pub(crate) fn session(dir: &Path, owner: &str) -> Session {
        Session::open(&global(dir, owner)).unwrap()
    }
}
