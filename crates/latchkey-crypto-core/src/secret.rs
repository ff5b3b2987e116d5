//! Secret Manager: the deployment's single 128-bit key.
//!
//! The secret keys both the credential digest and the challenge cipher, so
//! it is effectively part of the credential store's schema: every digest in
//! the store was produced under it, and replacing it (see
//! [`SecretFile::rotate`]) makes all of them unverifiable until the store is
//! rebuilt.
//!
//! There is no process-wide copy. Callers load a [`Secret`] once and pass it
//! by reference to every operation that needs it.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::memory::SecretBytes;

/// Secret length in bytes (128 bits).
pub const SECRET_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// The shared key material. Zeroized on drop, masked in `Debug`.
#[derive(Clone)]
pub struct Secret(SecretBytes<SECRET_LEN>);

impl Secret {
    /// Generate a fresh secret from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if the CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        SecretBytes::random().map(Self)
    }

    /// Build a secret from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `bytes` is exactly
    /// [`SECRET_LEN`] long. Short or long input is never padded or cut.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SECRET_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    what: "secret",
                    expected: SECRET_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(SecretBytes::new(arr)))
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn expose(&self) -> &[u8; SECRET_LEN] {
        self.0.expose()
    }
}

impl From<[u8; SECRET_LEN]> for Secret {
    fn from(bytes: [u8; SECRET_LEN]) -> Self {
        Self(SecretBytes::new(bytes))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretFile
// ---------------------------------------------------------------------------

/// The on-disk home of the secret: raw [`SECRET_LEN`] bytes, mode 0600.
#[derive(Debug, Clone)]
pub struct SecretFile {
    path: PathBuf,
}

impl SecretFile {
    /// Point at `path`. Nothing is touched on disk until a method is called.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the secret file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a secret has been persisted yet.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted secret, generating and persisting one on first use.
    ///
    /// Creation never replaces an existing file. When several processes
    /// start against an empty path at once, exactly one secret lands on disk
    /// and every caller returns that one.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Io`] if the file exists but cannot be read, or the
    ///   new secret cannot be written.
    /// - [`CryptoError::SecretFormat`] if the file is not exactly
    ///   [`SECRET_LEN`] bytes.
    pub fn load_or_create(&self) -> Result<Secret, CryptoError> {
        match self.read() {
            Err(CryptoError::Io(e)) if e.kind() == ErrorKind::NotFound => self.create(),
            other => other,
        }
    }

    /// Replace the persisted secret, generating one when `new_secret` is
    /// `None`, and return the secret now on disk.
    ///
    /// This is destructive: every digest written under the previous secret
    /// stops verifying.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Io`] if the write fails, or
    /// [`CryptoError::Rng`] if generation fails.
    pub fn rotate(&self, new_secret: Option<Secret>) -> Result<Secret, CryptoError> {
        let secret = match new_secret {
            Some(s) => s,
            None => Secret::generate()?,
        };
        self.write_temp(&secret)?
            .persist(&self.path)
            .map_err(|e| CryptoError::Io(e.error))?;
        Ok(secret)
    }

    fn read(&self) -> Result<Secret, CryptoError> {
        let mut bytes = fs::read(&self.path)?;
        let result = if bytes.len() == SECRET_LEN {
            Secret::from_slice(&bytes)
        } else {
            Err(CryptoError::SecretFormat {
                expected: SECRET_LEN,
                actual: bytes.len(),
            })
        };
        bytes.zeroize();
        result
    }

    /// First-use path. Losing the race to another creator means adopting
    /// its secret.
    fn create(&self) -> Result<Secret, CryptoError> {
        let secret = Secret::generate()?;
        match self.write_temp(&secret)?.persist_noclobber(&self.path) {
            Ok(_) => Ok(secret),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => self.read(),
            Err(e) => Err(CryptoError::Io(e.error)),
        }
    }

    /// Write `secret` to a uniquely named, owner-only, fsynced temp file
    /// beside the target. Dropping the handle removes the file.
    fn write_temp(&self, secret: &Secret) -> Result<NamedTempFile, CryptoError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !dir.exists() {
            create_private_dir(dir)?;
        }

        let mut prefix = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        prefix.push(".");

        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(secret.expose())?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        Ok(tmp)
    }
}

/// Create `dir` (and missing ancestors) readable by the owner only.
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
