//! Implementation of the `status`, `list`, `clear` and `sweep` commands.
//!
//! These work on the store's records directly. Only `clear` on a key this
//! owner holds goes through the regular conditional delete.

use super::{Session, format_duration};
use chrono::{DateTime, Utc};
use leasehold::error::{LeaseError, Result, STORE_WIDE_KEY};
use leasehold::store::{LockRecord, LockStatus, LockStore};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f UTC";

/// Execute the `leasehold status <key>` command.
pub fn cmd_status(session: &Session, key: &str) -> Result<()> {
    let lock = session.registry.get_lock(key);
    let key = lock.key();
    let record = session
        .store
        .fetch(key)
        .map_err(|e| LeaseError::store(key, e))?;
    let now = session.now()?;
    let status = LockStatus::of(record.as_ref(), session.owner_id(), now);

    println!("Lock: {}", key);
    println!("  Status:     {}", status);
    if let Some(record) = &record {
        print_record_details(record, now);
    }
    Ok(())
}

/// Execute the `leasehold list` command.
pub fn cmd_list(session: &Session) -> Result<()> {
    let mut records = session
        .store
        .records()
        .map_err(|e| LeaseError::store(STORE_WIDE_KEY, e))?;
    let now = session.now()?;

    if records.is_empty() {
        println!("No lease records.");
        return Ok(());
    }
    records.sort_by(|a, b| a.key.cmp(&b.key));

    println!("Lease records ({}):", records.len());
    println!();
    for record in &records {
        let status = LockStatus::of(Some(record), session.owner_id(), now);
        println!("  {} ({}):", record.key, status);
        print_record_details(record, now);
        println!();
    }

    let expired = records.iter().filter(|r| r.is_expired(now)).count();
    if expired > 0 {
        println!(
            "Note: {} record(s) are expired. Use `leasehold sweep` to delete them.",
            expired
        );
    }
    Ok(())
}

/// Execute the `leasehold clear <key>` command.
pub fn cmd_clear(session: &Session, key: &str, force: bool) -> Result<()> {
    let lock = session.registry.get_lock(key);
    let key = lock.key();
    let store = &session.store;
    let store_err = |e| LeaseError::store(key, e);

    let Some(record) = store.fetch(key).map_err(store_err)? else {
        println!("No lease record for '{}'.", key);
        return Ok(());
    };
    let now = session.now()?;

    let cleared = match LockStatus::of(Some(&record), session.owner_id(), now) {
        LockStatus::NotExist => false,
        LockStatus::HeldByMeExpired | LockStatus::HeldByOtherExpired => {
            store.delete_expired(key).map_err(store_err)?
        }
        LockStatus::HeldByMe => store.delete(key).map_err(store_err)?,
        LockStatus::HeldByOther if force => store.force_delete(key).map_err(store_err)?,
        LockStatus::HeldByOther => {
            return Err(LeaseError::UserError(format!(
                "refusing to clear live lease without --force flag.\n\n\
                 '{}' is held by {} for another {}.\n\
                 Clearing it lets a second owner in while the holder may still be working.\n\
                 Only clear it if you are certain the holder has crashed.\n\n\
                 To clear the lease, run:\n  leasehold clear {} --force",
                key,
                record.owner_id,
                format_duration(record.remaining(now)),
                key
            )));
        }
    };

    if cleared {
        println!("Cleared lease '{}' (owner: {}).", key, record.owner_id);
    } else {
        println!("Lease '{}' changed while clearing; nothing deleted.", key);
    }
    Ok(())
}

/// Execute the `leasehold sweep` command.
pub fn cmd_sweep(session: &Session) -> Result<()> {
    let store = &session.store;
    let records = store
        .records()
        .map_err(|e| LeaseError::store(STORE_WIDE_KEY, e))?;
    let now = session.now()?;

    let mut deleted = 0;
    for record in records.iter().filter(|r| r.is_expired(now)) {
        if store
            .delete_expired(&record.key)
            .map_err(|e| LeaseError::store(&record.key, e))?
        {
            println!("  deleted {} (owner: {})", record.key, record.owner_id);
            deleted += 1;
        }
    }

    println!("Swept {} expired record(s).", deleted);
    Ok(())
}

fn print_record_details(record: &LockRecord, now: DateTime<Utc>) {
    println!("    Owner:      {}", record.owner_id);
    println!("    Expires:    {}", record.expires_at.format(TIME_FORMAT));
    if record.is_expired(now) {
        let ago = (now - record.expires_at).to_std().unwrap_or_default();
        println!("    Remaining:  expired {} ago", format_duration(ago));
    } else {
        println!("    Remaining:  {}", format_duration(record.remaining(now)));
    }
}
