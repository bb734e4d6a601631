//! Implementation of the `leasehold run` command.
//!
//! Holds a lease for the lifetime of a child process. The lease is renewed
//! in the background while the child runs; if renewal fails for good, the
//! command reports the lost lease once the child exits.

use super::Session;
use crate::cli::RunArgs;
use leasehold::error::{LeaseError, Result};
use std::process::Command;
use std::time::Duration;
use tracing::info;

/// Execute the `leasehold run <key> --command "<cmd>"` command.
pub fn cmd_run(session: &Session, args: RunArgs) -> Result<()> {
    let argv = shell_words::split(&args.command)
        .map_err(|e| LeaseError::UserError(format!("invalid --command: {}", e)))?;
    let Some((program, program_args)) = argv.split_first() else {
        return Err(LeaseError::UserError("--command must not be empty".to_string()));
    };

    let lock = session.registry.get_lock(&args.key);
    let guard = match args.wait_ms {
        None => lock.acquire()?,
        Some(ms) => lock
            .try_acquire_for(Duration::from_millis(ms))?
            .ok_or_else(|| LeaseError::LockUnavailable(lock.key().to_string()))?,
    };
    info!(key = lock.key(), command = %args.command, "lease acquired; running command");

    let status = Command::new(program)
        .args(program_args)
        .status()
        .map_err(|e| LeaseError::UserError(format!("failed to run '{}': {}", program, e)))?;

    // Lease loss outranks the child's own exit status
    let still_held = guard.ensure_valid();
    guard.release()?;
    still_held?;

    if !status.success() {
        return Err(LeaseError::UserError(format!(
            "command '{}' failed with {}",
            args.command, status
        )));
    }
    Ok(())
}
