//! Challenge-response liveness check for the tag-reading peer.
//!
//! The verifier sends a fresh 8-byte [`Nonce`]; the peer proves possession
//! of the shared [`Secret`] by returning the nonce zero-padded to one AES
//! block and encrypted with AES-128. The verifier recomputes the block and
//! compares in constant time.
//!
//! # Cipher mode boundary
//!
//! The block is encrypted on its own, with no IV and no chaining (ECB over
//! exactly one block). That is sound here only because every plaintext is a
//! single block holding a random, never-reused nonce. Anything longer than
//! one block must move to an authenticated mode instead of extending this.
//!
//! # Replay
//!
//! The cipher has no notion of freshness. Replay protection lives in
//! [`NonceRegistry`]: a nonce is accepted at most once, and a recently
//! resolved nonce is never issued again.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Mutex;

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::ct::constant_time_eq;
use crate::error::CryptoError;
use crate::secret::Secret;

/// Nonce length in bytes (64 bits).
pub const NONCE_LEN: usize = 8;

/// AES block length in bytes; also the response length.
pub const BLOCK_LEN: usize = 16;

/// How many resolved nonces the registry remembers for replay rejection.
pub const DEFAULT_RESOLVED_WINDOW: usize = 4096;

/// Attempts at drawing a nonce that collides with neither outstanding nor
/// recently resolved ones before giving up.
const MAX_ISSUE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Single-use challenge value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Parse a nonce received from the transport.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `bytes` is exactly
    /// [`NONCE_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                what: "nonce",
                expected: NONCE_LEN,
                actual: bytes.len(),
            })
    }

    fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw nonce bytes, as sent over the transport.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        f.write_str(")")
    }
}

/// Encrypted, padded nonce.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Response([u8; BLOCK_LEN]);

impl Response {
    /// Parse a response received from the transport.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `bytes` is exactly
    /// [`BLOCK_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                what: "response",
                expected: BLOCK_LEN,
                actual: bytes.len(),
            })
    }

    /// Raw response bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        &self.0
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Response(***)")
    }
}

/// Result of checking a response. A mismatch is a normal outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The peer holds the shared secret.
    Accepted,
    /// Wrong response, wrong length, or a replayed nonce.
    Rejected,
}

impl Outcome {
    /// `true` for [`Outcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// ---------------------------------------------------------------------------
// Stateless primitives
// ---------------------------------------------------------------------------

/// Compute the response a holder of `secret` must return for `nonce`.
///
/// # Errors
///
/// Returns [`CryptoError::Cipher`] if the cipher cannot be keyed.
pub fn compute_expected(secret: &Secret, nonce: &Nonce) -> Result<Response, CryptoError> {
    let mut block = [0u8; BLOCK_LEN];
    block[..NONCE_LEN].copy_from_slice(&nonce.0);
    encrypt_block(secret.expose(), &block).map(Response)
}

/// Check `candidate` against the expected response for `nonce`.
///
/// Stateless: this does not consult a [`NonceRegistry`], so it offers no
/// replay protection on its own. A `candidate` of the wrong length is
/// [`Outcome::Rejected`]; it is peer input, not local configuration.
///
/// # Errors
///
/// Returns [`CryptoError::Cipher`] if the cipher cannot be keyed.
pub fn verify_response(
    secret: &Secret,
    nonce: &Nonce,
    candidate: &[u8],
) -> Result<Outcome, CryptoError> {
    let expected = compute_expected(secret, nonce)?;
    if constant_time_eq(&expected.0, candidate) {
        Ok(Outcome::Accepted)
    } else {
        Ok(Outcome::Rejected)
    }
}

fn encrypt_block(key: &[u8], block: &[u8; BLOCK_LEN]) -> Result<[u8; BLOCK_LEN], CryptoError> {
    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| CryptoError::Cipher("failed to create AES-128 key".into()))?;
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(&buf);
    Ok(out)
}

// ---------------------------------------------------------------------------
// NonceRegistry
// ---------------------------------------------------------------------------

/// Process-wide bookkeeping of issued and recently resolved nonces.
///
/// Shared by reference (or `Arc`) across connections; every access goes
/// through one mutex.
#[derive(Debug)]
pub struct NonceRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    outstanding: HashSet<Nonce>,
    resolved: HashSet<Nonce>,
    resolved_order: VecDeque<Nonce>,
    window: usize,
}

impl RegistryInner {
    fn remember_resolved(&mut self, nonce: Nonce) {
        if self.window == 0 || !self.resolved.insert(nonce) {
            return;
        }
        self.resolved_order.push_back(nonce);
        while self.resolved_order.len() > self.window {
            if let Some(old) = self.resolved_order.pop_front() {
                self.resolved.remove(&old);
            }
        }
    }
}

impl Default for NonceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceRegistry {
    /// Registry remembering [`DEFAULT_RESOLVED_WINDOW`] resolved nonces.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_RESOLVED_WINDOW)
    }

    /// Registry remembering the last `window` resolved nonces.
    #[must_use]
    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                outstanding: HashSet::new(),
                resolved: HashSet::new(),
                resolved_order: VecDeque::new(),
                window,
            }),
        }
    }

    /// Draw a fresh nonce and record it as outstanding.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Rng`] if the CSPRNG fails or keeps colliding.
    /// - [`CryptoError::RegistryPoisoned`] if the lock is poisoned.
    pub fn issue(&self) -> Result<Nonce, CryptoError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CryptoError::RegistryPoisoned)?;
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let nonce = Nonce::random()?;
            if inner.resolved.contains(&nonce) || inner.outstanding.contains(&nonce) {
                continue;
            }
            inner.outstanding.insert(nonce);
            return Ok(nonce);
        }
        Err(CryptoError::Rng(
            "could not draw an unused nonce".to_owned(),
        ))
    }

    /// Mark `nonce` resolved. Returns `true` only the first time an
    /// outstanding nonce is resolved; unknown or replayed nonces give
    /// `false`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RegistryPoisoned`] if the lock is poisoned.
    pub fn resolve(&self, nonce: &Nonce) -> Result<bool, CryptoError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CryptoError::RegistryPoisoned)?;
        let fresh = inner.outstanding.remove(nonce);
        inner.remember_resolved(*nonce);
        Ok(fresh)
    }

    /// Number of nonces issued but not yet resolved.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RegistryPoisoned`] if the lock is poisoned.
    pub fn outstanding(&self) -> Result<usize, CryptoError> {
        self.inner
            .lock()
            .map(|inner| inner.outstanding.len())
            .map_err(|_| CryptoError::RegistryPoisoned)
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Where one authentication attempt stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// No challenge sent yet.
    Idle,
    /// Challenge sent, waiting for the response.
    ChallengeIssued(Nonce),
    /// Attempt finished.
    Resolved(Outcome),
}

/// One challenge-response attempt: `Idle → ChallengeIssued → Resolved`.
///
/// Dropping an authenticator with a challenge still pending retires the
/// nonce so a late response cannot be accepted by anyone else.
pub struct Authenticator<'a> {
    secret: &'a Secret,
    registry: &'a NonceRegistry,
    state: AuthState,
}

impl<'a> Authenticator<'a> {
    /// Start an attempt in [`AuthState::Idle`].
    #[must_use]
    pub const fn new(secret: &'a Secret, registry: &'a NonceRegistry) -> Self {
        Self {
            secret,
            registry,
            state: AuthState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Issue the challenge nonce to send to the peer.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidState`] unless the attempt is `Idle`.
    /// - Registry errors from [`NonceRegistry::issue`].
    pub fn issue_challenge(&mut self) -> Result<Nonce, CryptoError> {
        if self.state != AuthState::Idle {
            return Err(CryptoError::InvalidState(format!(
                "challenge already issued ({:?})",
                self.state
            )));
        }
        let nonce = self.registry.issue()?;
        self.state = AuthState::ChallengeIssued(nonce);
        Ok(nonce)
    }

    /// Check the peer's response and finish the attempt.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidState`] unless a challenge is pending.
    /// - Registry or cipher errors.
    pub fn verify(&mut self, candidate: &[u8]) -> Result<Outcome, CryptoError> {
        let AuthState::ChallengeIssued(nonce) = self.state else {
            return Err(CryptoError::InvalidState(format!(
                "no pending challenge ({:?})",
                self.state
            )));
        };
        let fresh = self.registry.resolve(&nonce)?;
        let outcome = if fresh {
            verify_response(self.secret, &nonce, candidate)?
        } else {
            Outcome::Rejected
        };
        self.state = AuthState::Resolved(outcome);
        Ok(outcome)
    }
}

impl Drop for Authenticator<'_> {
    fn drop(&mut self) {
        if let AuthState::ChallengeIssued(nonce) = self.state {
            let _ = self.registry.resolve(&nonce);
        }
    }
}

impl fmt::Debug for Authenticator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
