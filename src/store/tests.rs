//! Contract tests shared by every store implementation.
//!
//! Each test gets two store views acting as different owners over the same
//! records, plus a function that lets the test lease lapse.

use super::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const TTL: Duration = Duration::from_millis(300);

struct Fixture {
    a: Box<dyn LockStore>,
    b: Box<dyn LockStore>,
    expire: Box<dyn Fn()>,
    _dir: Option<TempDir>,
}

fn memory_fixture() -> Fixture {
    let clock = Arc::new(ManualClock::default());
    let backend = MemoryBackend::with_clock(clock.clone());
    Fixture {
        a: Box::new(backend.session("node-a")),
        b: Box::new(backend.session("node-b")),
        expire: Box::new(move || clock.advance(TTL + Duration::from_millis(1))),
        _dir: None,
    }
}

fn file_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    Fixture {
        a: Box::new(FileLockStore::open(dir.path(), "node-a").unwrap()),
        b: Box::new(FileLockStore::open(dir.path(), "node-b").unwrap()),
        expire: Box::new(|| thread::sleep(TTL + Duration::from_millis(100))),
        _dir: Some(dir),
    }
}

fn fixtures() -> Vec<(&'static str, Fixture)> {
    vec![("memory", memory_fixture()), ("file", file_fixture())]
}

#[test]
fn test_create_is_exclusive() {
    for (name, f) in fixtures() {
        assert!(f.a.create("job-7", TTL).unwrap(), "{}", name);
        assert!(!f.b.create("job-7", TTL).unwrap(), "{}", name);
        assert!(!f.a.create("job-7", TTL).unwrap(), "{}", name);

        let record = f.b.fetch("job-7").unwrap().unwrap();
        assert_eq!(record.owner_id, "node-a", "{}", name);
    }
}

#[test]
fn test_status_from_both_sides() {
    for (name, f) in fixtures() {
        assert_eq!(f.a.status("job-7").unwrap(), LockStatus::NotExist, "{}", name);

        f.a.create("job-7", TTL).unwrap();
        assert_eq!(f.a.status("job-7").unwrap(), LockStatus::HeldByMe, "{}", name);
        assert_eq!(f.b.status("job-7").unwrap(), LockStatus::HeldByOther, "{}", name);

        (f.expire)();
        assert_eq!(
            f.a.status("job-7").unwrap(),
            LockStatus::HeldByMeExpired,
            "{}",
            name
        );
        assert_eq!(
            f.b.status("job-7").unwrap(),
            LockStatus::HeldByOtherExpired,
            "{}",
            name
        );
    }
}

#[test]
fn test_update_requires_ownership_or_expiry() {
    for (name, f) in fixtures() {
        assert!(!f.a.update("job-7", TTL).unwrap(), "{}: no record", name);

        f.a.create("job-7", TTL).unwrap();
        assert!(!f.b.update("job-7", TTL).unwrap(), "{}: live foreign", name);
        assert!(f.a.update("job-7", TTL).unwrap(), "{}: own record", name);

        (f.expire)();
        assert!(f.b.update("job-7", TTL).unwrap(), "{}: steal", name);
        assert_eq!(f.a.fetch("job-7").unwrap().unwrap().owner_id, "node-b");
        assert_eq!(f.a.status("job-7").unwrap(), LockStatus::HeldByOther, "{}", name);
    }
}

#[test]
fn test_update_expiry_never_changes_owner() {
    for (name, f) in fixtures() {
        assert!(!f.a.update_expiry("job-7", TTL).unwrap(), "{}", name);

        f.a.create("job-7", TTL).unwrap();
        let before = f.a.fetch("job-7").unwrap().unwrap().expires_at;

        (f.expire)();
        // Expired foreign leases are still not extendable by others
        assert!(!f.b.update_expiry("job-7", TTL).unwrap(), "{}", name);
        assert!(f.a.update_expiry("job-7", TTL).unwrap(), "{}", name);

        let after = f.a.fetch("job-7").unwrap().unwrap();
        assert_eq!(after.owner_id, "node-a", "{}", name);
        assert!(after.expires_at > before, "{}", name);
    }
}

#[test]
fn test_exists_means_live() {
    for (name, f) in fixtures() {
        assert!(!f.b.exists("job-7").unwrap(), "{}", name);

        f.a.create("job-7", TTL).unwrap();
        assert!(f.a.exists("job-7").unwrap(), "{}", name);
        assert!(f.b.exists("job-7").unwrap(), "{}", name);

        (f.expire)();
        assert!(!f.b.exists("job-7").unwrap(), "{}", name);
    }
}

#[test]
fn test_delete_only_own_records() {
    for (name, f) in fixtures() {
        f.a.create("job-7", TTL).unwrap();

        assert!(!f.b.delete("job-7").unwrap(), "{}", name);
        assert!(f.a.delete("job-7").unwrap(), "{}", name);
        assert!(!f.a.delete("job-7").unwrap(), "{}: already gone", name);
        assert!(f.a.fetch("job-7").unwrap().is_none(), "{}", name);
    }
}

#[test]
fn test_delete_expired_only_expired_records() {
    for (name, f) in fixtures() {
        f.a.create("job-7", TTL).unwrap();
        assert!(!f.b.delete_expired("job-7").unwrap(), "{}", name);

        (f.expire)();
        assert!(f.b.delete_expired("job-7").unwrap(), "{}", name);
        assert!(!f.b.delete_expired("job-7").unwrap(), "{}", name);
        assert!(f.b.create("job-7", TTL).unwrap(), "{}", name);
    }
}

#[test]
fn test_records_are_sorted_by_key() {
    for (name, f) in fixtures() {
        f.a.create("b", TTL).unwrap();
        f.b.create("a", TTL).unwrap();
        f.a.create("c/d", TTL).unwrap();

        let keys: Vec<_> = f.a.records().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b", "c/d"], "{}", name);
    }
}

#[test]
fn test_concurrent_steal_has_single_winner() {
    let clock = Arc::new(ManualClock::default());
    let backend = MemoryBackend::with_clock(clock.clone());
    backend.session("crashed").create("job-7", TTL).unwrap();
    clock.advance(TTL * 2);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = backend.session(format!("node-{}", i));
            thread::spawn(move || store.update("job-7", TTL).unwrap())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_concurrent_file_create_has_single_winner() {
    let dir = TempDir::new().unwrap();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = FileLockStore::open(dir.path(), format!("node-{}", i)).unwrap();
            thread::spawn(move || store.create("job-7", TTL).unwrap())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_lock_status_of() {
    let now = chrono::Utc::now();
    let live = LockRecord::new("k", "me", now, Duration::from_secs(5));
    let expired = LockRecord::new("k", "me", now - chrono::TimeDelta::seconds(10), Duration::from_secs(5));

    assert_eq!(LockStatus::of(None, "me", now), LockStatus::NotExist);
    assert_eq!(LockStatus::of(Some(&live), "me", now), LockStatus::HeldByMe);
    assert_eq!(LockStatus::of(Some(&live), "you", now), LockStatus::HeldByOther);
    assert_eq!(
        LockStatus::of(Some(&expired), "me", now),
        LockStatus::HeldByMeExpired
    );
    assert_eq!(
        LockStatus::of(Some(&expired), "you", now),
        LockStatus::HeldByOtherExpired
    );
    assert!(LockStatus::HeldByOther.is_held_by_other());
    assert_eq!(LockStatus::HeldByMeExpired.to_string(), "HELD_BY_ME_EXPIRED");
}

#[test]
fn test_record_expires_exactly_at_deadline() {
    let now = chrono::Utc::now();
    let record = LockRecord::new("k", "me", now, Duration::from_millis(500));

    assert!(!record.is_expired(now));
    assert!(record.is_expired(record.expires_at));
    assert_eq!(record.remaining(now), Duration::from_millis(500));
    assert_eq!(record.remaining(record.expires_at), Duration::ZERO);
}

#[test]
fn test_expiry_after_saturates() {
    let now = chrono::Utc::now();
    assert_eq!(
        expiry_after(now, Duration::from_secs(u64::MAX)),
        chrono::DateTime::<chrono::Utc>::MAX_UTC
    );
}
