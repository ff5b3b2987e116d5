//! `latchkey-crypto-core` — key material and primitives for LATCHKEY.
//!
//! Secret lifecycle, the keyed digest used by the credential store, and the
//! challenge-response check for the tag-reading peer. No storage engine, no
//! logging, no async.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod ct;

pub mod secret;

pub mod digest;

pub mod challenge;

pub use challenge::{
    compute_expected, verify_response, AuthState, Authenticator, Nonce, NonceRegistry, Outcome,
    Response, BLOCK_LEN, NONCE_LEN,
};
pub use ct::constant_time_eq;
pub use digest::{digest, Digest, DIGEST_LEN};
pub use error::CryptoError;
pub use memory::{disable_core_dumps, SecretBytes};
pub use secret::{Secret, SecretFile, SECRET_LEN};
