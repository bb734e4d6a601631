//! Filesystem utilities for the file-backed lock store.
//!
//! Lease records must never be observed half-written by another process, so
//! every record write goes through [`atomic_write`].

pub mod atomic;

pub use atomic::atomic_write;
