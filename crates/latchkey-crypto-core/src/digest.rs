//! Keyed Digest Transform: HMAC-SHA256 under the deployment [`Secret`].
//!
//! Identity tokens and authorization values are never stored or compared
//! in plaintext; both sides go through [`digest`] first. The output is the
//! full 256-bit tag, wide enough that brute-forcing the identity space or
//! searching for collisions is not feasible.

use std::fmt;

use ring::hmac;

use crate::ct::constant_time_eq;
use crate::error::CryptoError;
use crate::secret::Secret;

/// Digest width in bytes (HMAC-SHA256 output).
pub const DIGEST_LEN: usize = 32;

/// Keyed one-way projection of an identity or authorization string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Rebuild a digest read back from storage.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `bytes` is exactly
    /// [`DIGEST_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                what: "digest",
                expected: DIGEST_LEN,
                actual: bytes.len(),
            })
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Constant-time equality. Use this, not `==`, on any comparison that
    /// decides an authentication verdict.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    // First four bytes are enough to tell records apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Digest(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        f.write_str("…)")
    }
}

/// Digest `input` under `secret`.
///
/// Deterministic for a given `(secret, input)`; different secrets or inputs
/// give unrelated outputs.
#[must_use]
pub fn digest(secret: &Secret, input: &str) -> Digest {
    keyed_digest(secret.expose(), input.as_bytes())
}

fn keyed_digest(key: &[u8], message: &[u8]) -> Digest {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, message);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(tag.as_ref());
    Digest(out)
}
