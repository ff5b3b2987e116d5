//! Cryptographic error types for `latchkey-crypto-core`.

use thiserror::Error;

/// Errors produced by secret handling, digesting and challenge-response.
///
/// Authentication failures are *not* errors: a mismatched response or an
/// unknown credential is reported as a verdict by the caller-facing APIs.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key, nonce or digest material of the wrong length.
    #[error("invalid {what} length: {actual} bytes (expected {expected})")]
    InvalidLength {
        /// Which value was malformed (`"secret"`, `"nonce"`, ...).
        what: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Operation attempted from the wrong authenticator state.
    #[error("invalid authenticator state: {0}")]
    InvalidState(String),

    /// The persisted secret file does not hold exactly one secret.
    #[error("secret file is malformed: {actual} bytes (expected {expected})")]
    SecretFormat {
        /// Required file length in bytes.
        expected: usize,
        /// Length found on disk.
        actual: usize,
    },

    /// Filesystem failure while reading or writing the secret file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS random number generator failed.
    #[error("CSPRNG failure: {0}")]
    Rng(String),

    /// Block cipher initialisation failure.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// A thread panicked while holding the nonce registry lock.
    #[error("nonce registry lock poisoned")]
    RegistryPoisoned,
}

impl CryptoError {
    /// Returns `true` for structural faults (wrong lengths, misuse of the
    /// state machine). These are fatal to the attempt and must never be
    /// coerced into an authentication verdict.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidLength { .. } | Self::InvalidState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_length_is_config_error() {
        let err = CryptoError::InvalidLength {
            what: "nonce",
            expected: 8,
            actual: 3,
        };
        assert!(err.is_config_error());
        assert_eq!(
            err.to_string(),
            "invalid nonce length: 3 bytes (expected 8)"
        );
    }

    #[test]
    fn io_and_format_are_not_config_errors() {
        let io = CryptoError::Io(std::io::Error::other("boom"));
        assert!(!io.is_config_error());
        let fmt = CryptoError::SecretFormat {
            expected: 16,
            actual: 0,
        };
        assert!(!fmt.is_config_error());
    }
}
