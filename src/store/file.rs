//! Lock store backed by a directory shared between processes.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   records/<escaped key>.json   one JSON LockRecord per key
//!   .txn.lock                    store-wide transaction lock
//!   .clock                       touched to read the filesystem's time
//! ```
//!
//! Keys are escaped byte-wise into file names. When the escaped name would
//! be long, it is shortened to a readable prefix plus `~` and the SHA-256 of
//! the key; the full key is always kept inside the record.
//!
//! # Atomicity
//!
//! Conditional mutations run inside a transaction: an exclusive advisory
//! lock on `.txn.lock`, taken per open file handle, so only one caller in
//! any process can hold it. The file itself is never removed, and the OS
//! drops the lock when its holder exits, so a crashed process cannot leave
//! the store locked. Record files are replaced with [`atomic_write`], so
//! readers outside a transaction never see a partial record.
//!
//! On NFS, Linux implements the advisory lock with POSIX record locks, which
//! do not exclude other handles of the same process. Use one
//! `FileLockStore` per store directory per process there.
//!
//! # Clock
//!
//! [`LockStore::now`] writes the `.clock` file and returns the modification
//! time the filesystem stamped on it. On a network mount that is the file
//! server's clock, shared by every client. Lease precision is bounded by the
//! filesystem's timestamp granularity.

use super::types::{LockRecord, expiry_after};
use super::{LockStore, StoreResult};
use crate::error::StoreError;
use crate::fs::atomic_write;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RECORDS_DIR: &str = "records";
const TXN_LOCK_FILE: &str = ".txn.lock";
const CLOCK_FILE: &str = ".clock";
const RECORD_EXTENSION: &str = "json";

/// Escaped names longer than this are shortened and hashed.
const MAX_PLAIN_NAME_LEN: usize = 120;
/// Escaped characters kept in front of the hash of a shortened name.
const HASHED_PREFIX_LEN: usize = 48;

const DEFAULT_TXN_TIMEOUT: Duration = Duration::from_secs(5);
const TXN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A [`LockStore`] over a shared directory, acting as one owner.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    root: PathBuf,
    owner_id: String,
    txn_timeout: Duration,
}

impl FileLockStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, owner_id: impl Into<String>) -> StoreResult<Self> {
        let root = root.into();
        let records = root.join(RECORDS_DIR);
        fs::create_dir_all(&records).map_err(|e| {
            StoreError::Terminal(format!(
                "failed to create store directory '{}': {}",
                records.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            owner_id: owner_id.into(),
            txn_timeout: DEFAULT_TXN_TIMEOUT,
        })
    }

    /// How long to wait for the transaction lock before reporting a
    /// transient error.
    pub fn with_txn_timeout(mut self, timeout: Duration) -> Self {
        self.txn_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete the record for `key` whoever owns it. Administrative use only:
    /// a live owner keeps running its critical section unaware.
    pub fn force_delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|_| remove_record(&path))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(file_name_for(key))
    }

    fn clock_now(&self) -> StoreResult<DateTime<Utc>> {
        let path = self.root.join(CLOCK_FILE);
        fs::write(&path, b"tick").map_err(|e| StoreError::from_io("failed to touch store clock", &e))?;
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|e| StoreError::from_io("failed to read store clock", &e))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Run `f` while holding the store-wide transaction lock.
    fn transaction<T>(&self, f: impl FnOnce(DateTime<Utc>) -> StoreResult<T>) -> StoreResult<T> {
        let _txn = self.begin_transaction()?;
        let now = self.clock_now()?;
        f(now)
    }

    fn begin_transaction(&self) -> StoreResult<TxnGuard> {
        let path = self.root.join(TXN_LOCK_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::from_io("failed to open store transaction lock", &e))?;
        let deadline = Instant::now() + self.txn_timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(TxnGuard { file }),
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Transient(format!(
                            "store '{}' is busy: transaction lock held for more than {:?}",
                            self.root.display(),
                            self.txn_timeout
                        )));
                    }
                    thread::sleep(TXN_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(StoreError::from_io(
                        "failed to acquire store transaction lock",
                        &e,
                    ));
                }
            }
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Holds the transaction lock; unlocks when dropped.
struct TxnGuard {
    file: File,
}

impl Drop for TxnGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            // Closing the handle releases it anyway
            debug!("failed to unlock store transaction lock: {}", e);
        }
    }
}

impl LockStore for FileLockStore {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn now(&self) -> StoreResult<DateTime<Utc>> {
        self.clock_now()
    }

    fn fetch(&self, key: &str) -> StoreResult<Option<LockRecord>> {
        read_record(&self.record_path(key))
    }

    fn create(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|now| {
            if read_record(&path)?.is_some() {
                return Ok(false);
            }
            write_record(&path, &LockRecord::new(key, &self.owner_id, now, ttl))?;
            Ok(true)
        })
    }

    fn update(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|now| match read_record(&path)? {
            Some(record) if record.is_owned_by(&self.owner_id) || record.is_expired(now) => {
                if !record.is_owned_by(&self.owner_id) {
                    debug!(key, previous_owner = %record.owner_id, "taking over expired lease");
                }
                write_record(&path, &LockRecord::new(key, &self.owner_id, now, ttl))?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn update_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|now| match read_record(&path)? {
            Some(mut record) if record.is_owned_by(&self.owner_id) => {
                record.expires_at = expiry_after(now, ttl);
                write_record(&path, &record)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let Some(record) = self.fetch(key)? else {
            return Ok(false);
        };
        Ok(!record.is_expired(self.clock_now()?))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|_| match read_record(&path)? {
            Some(record) if record.is_owned_by(&self.owner_id) => remove_record(&path),
            _ => Ok(false),
        })
    }

    fn delete_expired(&self, key: &str) -> StoreResult<bool> {
        let path = self.record_path(key);
        self.transaction(|now| match read_record(&path)? {
            Some(record) if record.is_expired(now) => remove_record(&path),
            _ => Ok(false),
        })
    }

    fn records(&self) -> StoreResult<Vec<LockRecord>> {
        let dir = self.root.join(RECORDS_DIR);
        let entries =
            fs::read_dir(&dir).map_err(|e| StoreError::from_io("failed to list records", &e))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::from_io("failed to list records", &e))?;
            let path = entry.path();

            // Skip temporary files and anything that is not a record
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            if is_hidden || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {} // deleted while listing
                Err(e) => warn!("skipping unreadable record '{}': {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

/// Escape a key into a portable file name.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
/// Long results keep a prefix and append `~<sha256>`. Escaping never yields
/// `~`, so plain and hashed names cannot collide.
fn file_name_for(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    let mut prefix_len = None;
    for byte in key.bytes() {
        if prefix_len.is_none() && stem.len() + 3 > HASHED_PREFIX_LEN {
            prefix_len = Some(stem.len());
        }
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }

    if stem.len() > MAX_PLAIN_NAME_LEN {
        stem.truncate(prefix_len.unwrap_or(stem.len()));
        stem.push('~');
        stem.push_str(&hex::encode(Sha256::digest(key.as_bytes())));
    }
    format!("{}.{}", stem, RECORD_EXTENSION)
}

fn read_record(path: &Path) -> StoreResult<Option<LockRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::from_io("failed to read record", &e)),
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        StoreError::Terminal(format!(
            "failed to parse record '{}': {}",
            path.display(),
            e
        ))
    })
}

fn write_record(path: &Path, record: &LockRecord) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| StoreError::Terminal(format!("failed to serialize record: {}", e)))?;
    atomic_write(path, json.as_bytes()).map_err(|e| StoreError::from_io("failed to write record", &e))
}

fn remove_record(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::from_io("failed to delete record", &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_escapes_separators() {
        assert_eq!(file_name_for("job-7"), "job-7.json");
        assert_eq!(file_name_for("a/b"), "a%2Fb.json");
        assert_eq!(file_name_for(".."), "%2E%2E.json");
        assert_eq!(file_name_for("é"), "%C3%A9.json");
    }

    #[test]
    fn test_file_name_is_injective_for_escape_char() {
        assert_ne!(file_name_for("%2F"), file_name_for("/"));
    }

    #[test]
    fn test_long_file_names_are_hashed() {
        let long = "工作流".repeat(34);
        let name = file_name_for(&long);
        assert!(name.len() <= HASHED_PREFIX_LEN + 1 + 64 + 5, "{}", name);
        assert!(name.starts_with("%E5%B7%A5"));
        assert!(name.contains('~'));

        // Same prefix, different tail
        let other = format!("{}x", "工作流".repeat(33));
        assert_ne!(file_name_for(&other), name);
        assert_eq!(file_name_for(&long), name);

        let short = "a".repeat(100);
        assert_eq!(file_name_for(&short), format!("{}.json", short));
    }

    #[test]
    fn test_record_file_is_json() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();

        assert!(store.create("job-7", Duration::from_secs(30)).unwrap());

        let path = temp_dir.path().join("records").join("job-7.json");
        let content = fs::read_to_string(path).unwrap();
        let record: LockRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.key, "job-7");
        assert_eq!(record.owner_id, "node-a");
    }

    fn hold_txn_lock(root: &Path) -> File {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(TXN_LOCK_FILE))
            .unwrap();
        file.try_lock_exclusive().unwrap();
        file
    }

    #[test]
    fn test_transaction_lock_is_released() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();

        store.create("job-7", Duration::from_secs(30)).unwrap();
        let held = hold_txn_lock(temp_dir.path());
        FileExt::unlock(&held).unwrap();
    }

    #[test]
    fn test_busy_transaction_is_transient() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a")
            .unwrap()
            .with_txn_timeout(Duration::from_millis(20));

        let held = hold_txn_lock(temp_dir.path());

        let err = store.create("job-7", Duration::from_secs(30)).unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {}", err);

        drop(held);
        assert!(store.create("job-7", Duration::from_secs(30)).unwrap());
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a")
            .unwrap()
            .with_txn_timeout(Duration::from_millis(20));

        // A crashed holder leaves the file behind but not the lock
        fs::write(temp_dir.path().join(TXN_LOCK_FILE), "crashed").unwrap();

        assert!(store.create("job-7", Duration::from_secs(30)).unwrap());
    }

    #[test]
    fn test_concurrent_takeovers_of_expired_lease() {
        let temp_dir = TempDir::new().unwrap();
        let crashed = FileLockStore::open(temp_dir.path(), "crashed").unwrap();
        assert!(crashed.create("job-7", Duration::from_millis(1)).unwrap());
        std::thread::sleep(Duration::from_millis(50));

        let contenders = 8;
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let root = temp_dir.path().to_path_buf();
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store = FileLockStore::open(root, format!("node-{}", i)).unwrap();
                    barrier.wait();
                    store.update("job-7", Duration::from_secs(30)).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let record = crashed.fetch("job-7").unwrap().unwrap();
        assert_ne!(record.owner_id, "crashed");
    }

    #[test]
    fn test_corrupt_record_is_terminal() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();

        fs::write(temp_dir.path().join("records").join("job-7.json"), "{not json").unwrap();

        let err = store.fetch("job-7").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_records_skips_unreadable_and_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();
        let records_dir = temp_dir.path().join("records");

        store.create("job-7", Duration::from_secs(30)).unwrap();
        fs::write(records_dir.join("broken.json"), "garbage").unwrap();
        fs::write(records_dir.join(".job-8.json.123.tmp"), "{}").unwrap();
        fs::write(records_dir.join("notes.txt"), "hello").unwrap();

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "job-7");
    }

    #[test]
    fn test_long_multibyte_key_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();
        let other = FileLockStore::open(temp_dir.path(), "node-b").unwrap();

        let key = "工作流".repeat(34);
        let key: String = key.chars().take(100).collect();
        assert!(store.create(&key, Duration::from_secs(30)).unwrap());
        assert!(!other.create(&key, Duration::from_secs(30)).unwrap());
        assert!(store.update_expiry(&key, Duration::from_secs(30)).unwrap());

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, key);

        assert!(store.delete(&key).unwrap());
        assert!(store.fetch(&key).unwrap().is_none());
    }

    #[test]
    fn test_force_delete_ignores_owner() {
        let temp_dir = TempDir::new().unwrap();
        let a = FileLockStore::open(temp_dir.path(), "node-a").unwrap();
        let b = FileLockStore::open(temp_dir.path(), "node-b").unwrap();

        a.create("job-7", Duration::from_secs(30)).unwrap();
        assert!(!b.delete("job-7").unwrap());
        assert!(b.force_delete("job-7").unwrap());
        assert!(a.fetch("job-7").unwrap().is_none());
    }

    #[test]
    fn test_clock_advances() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLockStore::open(temp_dir.path(), "node-a").unwrap();

        let first = store.now().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let second = store.now().unwrap();
        assert!(second > first);
    }
}
