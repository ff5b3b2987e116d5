//! Store handle: `SQLite` connection, size cap, and migration runner.
//!
//! One [`CredentialStore`] owns one connection. Reads run in their own
//! deferred transaction on `&self` and see a consistent WAL snapshot; writes
//! take `&mut self` and an IMMEDIATE transaction, so a handle never has two
//! writers open and `SQLite`'s lock serializes writers across handles and
//! processes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::StoreError;

/// Default maximum database size (10 MiB).
pub const DEFAULT_SIZE_LIMIT: u64 = 10_485_760;

/// How long a writer waits for another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Forward-only SQL migrations, embedded at compile time.
/// Index 0 → version 1.
const MIGRATIONS: &[&str] = &[include_str!("../migrations/001_credentials.sql")];

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Handle to an open credential store.
///
/// The connection is released when the handle is dropped; [`close`](Self::close)
/// does the same but reports errors.
pub struct CredentialStore {
    pub(crate) conn: Connection,
    path: PathBuf,
    size_limit: u64,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("size_limit", &self.size_limit)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Open (or create) the store at `path`, capped at `size_limit` bytes.
    ///
    /// 1. Opens the database file and sets the busy timeout.
    /// 2. Caps the file at `size_limit / page_size` pages.
    /// 3. Enables WAL journaling.
    /// 4. Runs pending migrations.
    /// 5. Restricts the file to owner read/write.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSizeLimit`] if `size_limit` is below one page.
    /// - [`StoreError::CapacityExceeded`] if an existing file is already
    ///   larger than `size_limit`, or the schema does not fit.
    /// - [`StoreError::Database`] for path or permission problems.
    /// - [`StoreError::Migration`] if the file's schema is newer than this build.
    pub fn open(path: &Path, size_limit: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        apply_size_limit(&conn, size_limit)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let mut store = Self {
            conn,
            path: path.to_path_buf(),
            size_limit,
        };
        store.run_migrations()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), size_limit, "credential store opened");
        Ok(store)
    }

    /// Close the connection, surfacing any error `Drop` would swallow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if `SQLite` refuses to close.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::from(e))
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size limit in bytes this handle was opened with.
    #[must_use]
    pub const fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Current schema version (`PRAGMA user_version`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pragma query fails.
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let v: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(v)
    }

    /// Read-only snapshot. Never commits; dropping it rolls back.
    pub(crate) fn read_tx(&self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Exclusive write transaction. The caller commits.
    pub(crate) fn write_tx(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Apply any pending [`MIGRATIONS`].
    ///
    /// Pending scripts run together in one write transaction; the version
    /// is re-read under the lock so concurrent openers apply them once.
    fn run_migrations(&mut self) -> Result<(), StoreError> {
        let target = i32::try_from(MIGRATIONS.len())
            .map_err(|_| StoreError::Migration("too many migrations".into()))?;
        if self.schema_version()? == target {
            return Ok(());
        }

        let tx = self.write_tx()?;
        let current: i32 = tx.pragma_query_value(None, "user_version", |row| row.get(0))?;
        let pending = usize::try_from(current)
            .ok()
            .and_then(|applied| MIGRATIONS.get(applied..))
            .ok_or_else(|| {
                StoreError::Migration(format!(
                    "schema version {current} is not supported by this build (latest {target})"
                ))
            })?;

        for sql in pending {
            tx.execute_batch(sql)?;
        }
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;

        tracing::info!(from = current, to = target, "credential store schema upgraded");
        Ok(())
    }
}

/// Cap the database at `size_limit` bytes via `PRAGMA max_page_count`.
///
/// `SQLite` will not lower the cap below the current page count; it reports
/// the count instead, which is how an oversized existing file is detected.
fn apply_size_limit(conn: &Connection, size_limit: u64) -> Result<(), StoreError> {
    let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
    let page_size = u64::try_from(page_size)
        .map_err(|_| StoreError::Database(format!("invalid page size {page_size}")))?;

    let max_pages = size_limit.checked_div(page_size).unwrap_or(0);
    if max_pages == 0 {
        return Err(StoreError::InvalidSizeLimit {
            requested: size_limit,
            page_size,
        });
    }
    let max_pages = i64::try_from(max_pages).unwrap_or(i64::MAX);

    let applied: i64 =
        conn.pragma_update_and_check(None, "max_page_count", max_pages, |row| row.get(0))?;
    if applied > max_pages {
        tracing::warn!(
            existing_pages = applied,
            max_pages,
            "credential store already exceeds its size limit"
        );
        return Err(StoreError::CapacityExceeded);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
