//! `latchkey-store` — persistent credential store for LATCHKEY.
//!
//! Maps keyed digests of identity tokens to keyed digests of authorization
//! values in an embedded `SQLite` file with a hard size cap.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod credentials;
pub mod db;
pub mod error;
pub mod seed;

pub use credentials::Verdict;
pub use db::{CredentialStore, DEFAULT_SIZE_LIMIT};
pub use error::StoreError;
pub use seed::{load_seed_file, parse_seeds, SeedRecord};
