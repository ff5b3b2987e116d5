//! Store error types for `latchkey-store`.

use latchkey_crypto_core::CryptoError;
use thiserror::Error;

/// Errors produced by credential store operations.
///
/// A credential that does not match is a [`Verdict`](crate::Verdict), not an
/// error. Everything here is a structural or environmental fault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Cryptographic failure (delegated from crypto-core).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// `SQLite` error not covered by a more specific variant.
    #[error("database error: {0}")]
    Database(String),

    /// The write would grow the database past its configured size limit.
    #[error("credential store is full")]
    CapacityExceeded,

    /// The requested size limit cannot hold even a single page.
    #[error("size limit of {requested} bytes is below one {page_size}-byte page")]
    InvalidSizeLimit {
        /// Limit passed to `open`.
        requested: u64,
        /// Page size of the database file.
        page_size: u64,
    },

    /// Another connection held the write lock past the busy timeout.
    #[error("credential store is locked by another writer")]
    Busy,

    /// A stored record does not have the shape this crate writes.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Seed file could not be parsed or is inconsistent.
    #[error("seed error: {0}")]
    Seed(String),

    /// Filesystem error outside `SQLite` (seed files, permissions).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref ffi_err, _) = err {
            match ffi_err.code {
                rusqlite::ffi::ErrorCode::DiskFull => return Self::CapacityExceeded,
                rusqlite::ffi::ErrorCode::DatabaseBusy
                | rusqlite::ffi::ErrorCode::DatabaseLocked => return Self::Busy,
                _ => {}
            }
        }
        Self::Database(err.to_string())
    }
}
