#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for the store handle: size cap, locking, and
//! concurrent readers.

use std::thread;

use latchkey_crypto_core::secret::{Secret, SECRET_LEN};
use latchkey_store::{CredentialStore, SeedRecord, StoreError, DEFAULT_SIZE_LIMIT};

fn test_secret() -> Secret {
    Secret::from([0x77; SECRET_LEN])
}

// -------------------------------------------------------------------------
// Size bound
// -------------------------------------------------------------------------

#[test]
fn inserting_past_size_limit_fails_with_capacity_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CredentialStore::open(&dir.path().join("small.db"), 16 * 1024).unwrap();
    let secret = test_secret();

    let mut stored = 0u64;
    let mut failure = None;
    for i in 0..5_000 {
        match store.upsert(&secret, &format!("tag-{i}"), "0101") {
            Ok(()) => stored += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    assert!(
        matches!(failure, Some(StoreError::CapacityExceeded)),
        "expected CapacityExceeded, got {failure:?}"
    );
    // Everything committed before the failure is still there.
    assert_eq!(store.record_count().unwrap(), stored);
    assert!(store
        .verify(&secret, "tag-0", "0101")
        .unwrap()
        .is_accepted());
}

#[test]
fn oversized_seed_batch_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CredentialStore::open(&dir.path().join("small.db"), 16 * 1024).unwrap();
    let seeds: Vec<SeedRecord> = (0..5_000)
        .map(|i| SeedRecord::new(format!("tag-{i}"), "1"))
        .collect();

    let err = store.initialize(&test_secret(), &seeds).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded));
    assert!(!store.is_initialized().unwrap());
    assert_eq!(store.record_count().unwrap(), 0);
}

#[test]
fn reopening_with_smaller_limit_than_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grown.db");
    {
        let mut store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
        let seeds: Vec<SeedRecord> = (0..2_000)
            .map(|i| SeedRecord::new(format!("tag-{i}"), "1"))
            .collect();
        store.initialize(&test_secret(), &seeds).unwrap();
        // Fold the WAL back so the main file reflects the real size.
        store.close().unwrap();
    }

    let err = CredentialStore::open(&path, 8 * 1024).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded));
}

#[test]
fn open_in_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = CredentialStore::open(
        &dir.path().join("no-such-dir").join("c.db"),
        DEFAULT_SIZE_LIMIT,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

#[cfg(unix)]
#[test]
fn database_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.db");
    let _store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// -------------------------------------------------------------------------
// Locking and snapshots
// -------------------------------------------------------------------------

#[test]
fn second_writer_waits_then_reports_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.db");
    let mut store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = store.upsert(&test_secret(), "tag", "1").unwrap_err();
    assert!(matches!(err, StoreError::Busy), "got {err:?}");

    holder.execute_batch("ROLLBACK;").unwrap();
    store.upsert(&test_secret(), "tag", "1").unwrap();
}

#[test]
fn readers_proceed_while_writer_holds_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.db");
    let secret = test_secret();
    {
        let mut store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
        store
            .initialize(&secret, &[SeedRecord::new("John", "Doe")])
            .unwrap();
    }

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let reader = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
    assert!(reader.verify(&secret, "John", "Doe").unwrap().is_accepted());

    holder.execute_batch("ROLLBACK;").unwrap();
}

#[test]
fn parallel_handles_read_committed_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.db");
    let secret = test_secret();
    {
        let mut store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
        let seeds: Vec<SeedRecord> = (0..50)
            .map(|i| SeedRecord::new(format!("tag-{i}"), format!("v-{i}")))
            .collect();
        store.initialize(&secret, &seeds).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let path = path.clone();
            let secret = secret.clone();
            thread::spawn(move || {
                let store = CredentialStore::open(&path, DEFAULT_SIZE_LIMIT).unwrap();
                for i in (t..50).step_by(4) {
                    assert!(store
                        .verify(&secret, &format!("tag-{i}"), &format!("v-{i}"))
                        .unwrap()
                        .is_accepted());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
