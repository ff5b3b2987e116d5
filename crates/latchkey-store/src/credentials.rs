//! Credential operations: seed, look up, verify, enroll, revoke.
//!
//! Every identity and authorization value is digested under the caller's
//! [`Secret`] before it reaches SQL. The table maps
//! `digest(identity) -> digest(authorization)`; a reserved sentinel row
//! records that seeding has happened.

use latchkey_crypto_core::digest::{digest, Digest};
use latchkey_crypto_core::secret::Secret;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::CredentialStore;
use crate::error::StoreError;
use crate::seed::SeedRecord;

/// Reserved key of the initialization sentinel.
const INIT_KEY: &[u8] = b"__init__";

/// Sentinel value meaning "seeded".
const INIT_MARKER: &[u8] = b"true";

/// Outcome of checking a credential. Rejections are normal results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// Identity known and authorization value matches.
    Accepted,
    /// No record for this identity.
    RejectedUnknownIdentity,
    /// Identity known but the authorization value differs.
    RejectedBadValue,
}

impl Verdict {
    /// `true` for [`Verdict::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl CredentialStore {
    /// Whether the sentinel says the store has been seeded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the read fails.
    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        let tx = self.read_tx()?;
        let marker: Option<Vec<u8>> = tx
            .query_row(
                "SELECT value FROM credentials WHERE key = ?1",
                params![INIT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(marker.as_deref() == Some(INIT_MARKER))
    }

    /// Write every seed record and then the sentinel, in one transaction.
    ///
    /// Safe to repeat: existing records are replaced (last write wins). If
    /// any write fails, nothing is committed and the sentinel stays unset.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] if the seeds do not fit.
    /// - [`StoreError::Database`] / [`StoreError::Busy`] on write failure.
    pub fn initialize(&mut self, secret: &Secret, seeds: &[SeedRecord]) -> Result<(), StoreError> {
        tracing::info!(records = seeds.len(), "initializing credential store");
        let tx = self.write_tx()?;
        insert_seeds(&tx, secret, seeds)?;
        tx.execute(
            "INSERT OR REPLACE INTO credentials (key, value) VALUES (?1, ?2)",
            params![INIT_KEY, INIT_MARKER],
        )?;
        tx.commit()?;
        tracing::info!("credential store initialization complete");
        Ok(())
    }

    /// Seed the store unless the sentinel is already set. Returns `true`
    /// if seeding ran.
    ///
    /// # Errors
    ///
    /// As for [`is_initialized`](Self::is_initialized) and
    /// [`initialize`](Self::initialize).
    pub fn initialize_if_needed(
        &mut self,
        secret: &Secret,
        seeds: &[SeedRecord],
    ) -> Result<bool, StoreError> {
        if self.is_initialized()? {
            tracing::debug!("credential store already initialized");
            return Ok(false);
        }
        self.initialize(secret, seeds)?;
        Ok(true)
    }

    /// Stored authorization digest for `identity`, if enrolled.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Corrupt`] if the stored value has the wrong width.
    /// - [`StoreError::Database`] if the read fails.
    pub fn lookup(&self, secret: &Secret, identity: &str) -> Result<Option<Digest>, StoreError> {
        self.lookup_digest(&digest(secret, identity))
    }

    /// Stored authorization digest for an already-digested identity.
    ///
    /// # Errors
    ///
    /// As for [`lookup`](Self::lookup).
    pub fn lookup_digest(&self, identity_digest: &Digest) -> Result<Option<Digest>, StoreError> {
        let tx = self.read_tx()?;
        let stored = select_value(&tx, identity_digest)?;
        tracing::debug!(identity = ?identity_digest, found = stored.is_some(), "credential lookup");
        Ok(stored)
    }

    /// Check `candidate` against the value enrolled for `identity`.
    ///
    /// The comparison is constant-time over the digests.
    ///
    /// # Errors
    ///
    /// As for [`lookup`](Self::lookup). Mismatches are verdicts, not errors.
    pub fn verify(
        &self,
        secret: &Secret,
        identity: &str,
        candidate: &str,
    ) -> Result<Verdict, StoreError> {
        let Some(stored) = self.lookup(secret, identity)? else {
            return Ok(Verdict::RejectedUnknownIdentity);
        };
        if digest(secret, candidate).ct_eq(&stored) {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::RejectedBadValue)
        }
    }

    /// Enroll `identity`, or replace its authorization value.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] if the store is full.
    /// - [`StoreError::Database`] / [`StoreError::Busy`] on write failure.
    pub fn upsert(
        &mut self,
        secret: &Secret,
        identity: &str,
        authorization: &str,
    ) -> Result<(), StoreError> {
        let tx = self.write_tx()?;
        let key = digest(secret, identity);
        put(&tx, &key, &digest(secret, authorization))?;
        tx.commit()?;
        tracing::info!(identity = ?key, "credential enrolled");
        Ok(())
    }

    /// Remove the record for `identity`. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] / [`StoreError::Busy`] on write failure.
    pub fn revoke(&mut self, secret: &Secret, identity: &str) -> Result<bool, StoreError> {
        self.revoke_digest(&digest(secret, identity))
    }

    /// Remove the record keyed by an identity digest. Returns `true` if one
    /// existed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] / [`StoreError::Busy`] on write failure.
    pub fn revoke_digest(&mut self, identity_digest: &Digest) -> Result<bool, StoreError> {
        let tx = self.write_tx()?;
        let removed = tx.execute(
            "DELETE FROM credentials WHERE key = ?1",
            params![&identity_digest.as_bytes()[..]],
        )?;
        tx.commit()?;
        tracing::info!(identity = ?identity_digest, removed = removed > 0, "credential revoked");
        Ok(removed > 0)
    }

    /// Number of credential records, not counting the sentinel.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] if the read fails.
    pub fn record_count(&self) -> Result<u64, StoreError> {
        let tx = self.read_tx()?;
        let count: i64 = tx.query_row(
            "SELECT count(*) FROM credentials WHERE key != ?1",
            params![INIT_KEY],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    /// Drop every record and re-seed under `secret`, in one transaction.
    ///
    /// This is the recovery path after a secret rotation, when every stored
    /// digest has become unverifiable.
    ///
    /// # Errors
    ///
    /// As for [`initialize`](Self::initialize). On failure the old contents
    /// are kept.
    pub fn rebuild(&mut self, secret: &Secret, seeds: &[SeedRecord]) -> Result<(), StoreError> {
        self.rebuild_with(secret, seeds, || Ok(()))
    }

    /// [`rebuild`](Self::rebuild), running `before_commit` once every write
    /// has succeeded and while the write lock is still held.
    ///
    /// If `before_commit` fails the transaction rolls back. Used to persist
    /// a rotated secret only when the store is certain to follow it.
    ///
    /// # Errors
    ///
    /// As for [`rebuild`](Self::rebuild), plus whatever `before_commit`
    /// returns.
    pub fn rebuild_with<F>(
        &mut self,
        secret: &Secret,
        seeds: &[SeedRecord],
        before_commit: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce() -> Result<(), StoreError>,
    {
        tracing::warn!(records = seeds.len(), "rebuilding credential store");
        let tx = self.write_tx()?;
        tx.execute("DELETE FROM credentials", [])?;
        insert_seeds(&tx, secret, seeds)?;
        tx.execute(
            "INSERT OR REPLACE INTO credentials (key, value) VALUES (?1, ?2)",
            params![INIT_KEY, INIT_MARKER],
        )?;
        before_commit()?;
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn insert_seeds(conn: &Connection, secret: &Secret, seeds: &[SeedRecord]) -> Result<(), StoreError> {
    for seed in seeds {
        put(
            conn,
            &digest(secret, &seed.identity),
            &digest(secret, &seed.authorization),
        )?;
    }
    Ok(())
}

fn put(conn: &Connection, key: &Digest, value: &Digest) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO credentials (key, value) VALUES (?1, ?2)",
        params![&key.as_bytes()[..], &value.as_bytes()[..]],
    )?;
    Ok(())
}

fn select_value(conn: &Connection, key: &Digest) -> Result<Option<Digest>, StoreError> {
    let raw: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM credentials WHERE key = ?1",
            params![&key.as_bytes()[..]],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|bytes| {
        Digest::from_slice(&bytes).map_err(|_| {
            StoreError::Corrupt(format!("stored value is {} bytes", bytes.len()))
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DEFAULT_SIZE_LIMIT;
    use latchkey_crypto_core::secret::SECRET_LEN;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> CredentialStore {
        CredentialStore::open(&dir.path().join("c.db"), DEFAULT_SIZE_LIMIT).unwrap()
    }

    fn secret() -> Secret {
        Secret::from([0x42; SECRET_LEN])
    }

    #[test]
    fn fresh_store_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(!store.is_initialized().unwrap());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn sentinel_not_counted_as_record() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.initialize(&secret(), &[]).unwrap();
        assert!(store.is_initialized().unwrap());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn plaintext_never_reaches_the_table() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.upsert(&secret(), "John", "Doe").unwrap();

        let mut stmt = store.conn.prepare("SELECT key, value FROM credentials").unwrap();
        let rows: Vec<(Vec<u8>, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, digest(&secret(), "John").as_bytes().to_vec());
        assert_eq!(rows[0].1, digest(&secret(), "Doe").as_bytes().to_vec());
    }

    #[test]
    fn wrong_width_value_reported_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let key = digest(&secret(), "John");
        store
            .conn
            .execute(
                "INSERT INTO credentials (key, value) VALUES (?1, ?2)",
                params![&key.as_bytes()[..], &b"short"[..]],
            )
            .unwrap();
        let err = store.lookup(&secret(), "John").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn failed_before_commit_keeps_old_contents() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.upsert(&secret(), "John", "Doe").unwrap();

        let other = Secret::from([0x24; SECRET_LEN]);
        let err = store
            .rebuild_with(&other, &[SeedRecord::new("Jane", "Roe")], || {
                Err(StoreError::Seed("refused".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Seed(_)));
        assert!(store.verify(&secret(), "John", "Doe").unwrap().is_accepted());
        assert_eq!(
            store.verify(&other, "Jane", "Roe").unwrap(),
            Verdict::RejectedUnknownIdentity
        );
        assert!(!store.is_initialized().unwrap());
    }

    #[test]
    fn before_commit_runs_after_writes() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        let mut ran = false;
        store
            .rebuild_with(&secret(), &[SeedRecord::new("John", "Doe")], || {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert!(ran);
        assert!(store.verify(&secret(), "John", "Doe").unwrap().is_accepted());
    }

    #[test]
    fn verdict_serializes_camel_case() {
        let json = serde_json::to_string(&Verdict::RejectedUnknownIdentity).unwrap();
        assert_eq!(json, "\"rejectedUnknownIdentity\"");
    }
}
