//! Reader configuration, stored as plain JSON next to the data files.
//!
//! Every field is defaulted, so a missing file or an empty object gives a
//! working local setup under `data/`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use latchkey_store::DEFAULT_SIZE_LIMIT;
use serde::{Deserialize, Serialize};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "latchkey.json";

/// Reader host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReaderConfig {
    /// Path of the 16-byte secret file.
    #[serde(default = "default_secret_path")]
    pub secret_path: PathBuf,

    /// Path of the credential database.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Hard cap on the database file, in bytes.
    #[serde(default = "default_store_size_limit")]
    pub store_size_limit_bytes: u64,

    /// JSON seed list applied on first start and on `--reseed`.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,

    /// Directory for daily rolling log files. Stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Default `tracing` filter; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            secret_path: default_secret_path(),
            store_path: default_store_path(),
            store_size_limit_bytes: default_store_size_limit(),
            seed_path: None,
            log_dir: None,
            log_level: default_log_level(),
        }
    }
}

fn default_secret_path() -> PathBuf {
    PathBuf::from("data/reader.key")
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/credentials.db")
}
const fn default_store_size_limit() -> u64 {
    DEFAULT_SIZE_LIMIT
}
fn default_log_level() -> String {
    "info".into()
}

impl ReaderConfig {
    /// Load the config at `path`.
    ///
    /// A missing file yields [`Default::default()`]; a file that exists but
    /// does not parse is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading config {}", path.display()))
            }
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    /// Create the parent directories of every configured file, owner-only.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_data_dirs(&self) -> anyhow::Result<()> {
        let parents = [self.secret_path.parent(), self.store_path.parent()];
        for dir in parents
            .into_iter()
            .flatten()
            .chain(self.log_dir.as_deref())
        {
            if dir.as_os_str().is_empty() {
                continue;
            }
            create_private_dir(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
