//! CLI argument parsing for leasehold.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Leasehold: lease-based distributed mutex over a shared directory.
///
/// Every process pointing at the same store directory takes part in the
/// same locks:
/// - A lease record names its owner and an expiry
/// - Holders renew their lease while working
/// - A crashed holder's lease expires and can be taken over
#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Directory holding the lease records (overrides `store_dir` in the config).
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Config file. Defaults to `leasehold.yaml` in the current directory, if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Owner id written into lease records (overrides `owner_id` in the config).
    #[arg(long, global = true)]
    pub owner_id: Option<String>,
}

/// Available commands for leasehold.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show who holds a lock.
    ///
    /// Prints the record for the key and its status as seen by this owner.
    Status(StatusArgs),

    /// List every lease record in the store.
    List,

    /// Run a command while holding a lock.
    ///
    /// Acquires the lease (waiting if needed), renews it while the command
    /// runs, and releases it when the command exits.
    Run(RunArgs),

    /// Delete a lease record.
    ///
    /// Expired records are deleted without further checks. Requires --force
    /// to delete a live record held by another owner.
    Clear(ClearArgs),

    /// Delete every expired lease record.
    Sweep,
}

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Lock key.
    pub key: String,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Lock key.
    pub key: String,

    /// Give up after this many milliseconds instead of waiting indefinitely.
    #[arg(long)]
    pub wait_ms: Option<u64>,

    /// Command line to run, split with shell quoting rules.
    #[arg(long)]
    pub command: String,
}

/// Arguments for the `clear` command.
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Lock key.
    pub key: String,

    /// Delete the record even if it is live and held by another owner.
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
