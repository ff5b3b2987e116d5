//! Seed records written when a store is first initialized.
//!
//! Seeds are plaintext `(identity, authorization)` pairs supplied by the
//! deployment, usually as a JSON file:
//!
//! ```json
//! [{ "identity": "000000000000000000773030376D6171", "authorization": "0100101010000000" }]
//! ```
//!
//! They are digested on the way into the store and never persisted as-is.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One plaintext credential to enroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    /// Identity token, e.g. a hex tag ID.
    pub identity: String,
    /// Authorization value, e.g. an LED bit pattern.
    pub authorization: String,
}

impl SeedRecord {
    /// Convenience constructor.
    #[must_use]
    pub fn new(identity: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            authorization: authorization.into(),
        }
    }
}

/// Parse a JSON array of seed records.
///
/// # Errors
///
/// Returns [`StoreError::Seed`] on malformed JSON or when the same identity
/// appears twice (the second would silently overwrite the first).
pub fn parse_seeds(json: &str) -> Result<Vec<SeedRecord>, StoreError> {
    let seeds: Vec<SeedRecord> =
        serde_json::from_str(json).map_err(|e| StoreError::Seed(e.to_string()))?;

    let mut seen = HashSet::with_capacity(seeds.len());
    for seed in &seeds {
        if !seen.insert(seed.identity.as_str()) {
            return Err(StoreError::Seed(format!(
                "duplicate identity in seed list ({} records)",
                seeds.len()
            )));
        }
    }
    Ok(seeds)
}

/// Read and parse a seed file.
///
/// # Errors
///
/// - [`StoreError::Io`] if the file cannot be read.
/// - [`StoreError::Seed`] as for [`parse_seeds`].
pub fn load_seed_file(path: &Path) -> Result<Vec<SeedRecord>, StoreError> {
    let json = fs::read_to_string(path)?;
    parse_seeds(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_array_of_records() {
        let seeds =
            parse_seeds(r#"[{"identity":"John","authorization":"Doe"}]"#).unwrap();
        assert_eq!(seeds, vec![SeedRecord::new("John", "Doe")]);
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_seeds("[]").unwrap().is_empty());
    }

    #[test]
    fn duplicate_identity_rejected() {
        let err = parse_seeds(
            r#"[{"identity":"A","authorization":"1"},{"identity":"A","authorization":"2"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Seed(_)));
    }

    #[test]
    fn missing_field_rejected() {
        let err = parse_seeds(r#"[{"identity":"A"}]"#).unwrap_err();
        assert!(matches!(err, StoreError::Seed(_)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_seed_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seeds.json");
        fs::write(
            &path,
            r#"[{"identity":"tag-1","authorization":"0101"},{"identity":"tag-2","authorization":"1010"}]"#,
        )
        .unwrap();
        let seeds = load_seed_file(&path).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[1].authorization, "1010");
    }
}
