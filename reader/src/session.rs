//! Line-protocol ingestion from the tag reader.
//!
//! The microcontroller writes one reading per line:
//!
//! ```text
//! 000000000000000000773030376D6171,0100101010000000
//! ```
//!
//! i.e. `identity,authorization`. Each reading is checked against the
//! credential store and the verdict logged. Malformed lines are skipped;
//! an I/O error on the input or a store fault ends the session.

use std::io::{self, BufRead, Read};
use std::time::Instant;

use anyhow::Context;
use latchkey_crypto_core::digest::digest;
use latchkey_crypto_core::secret::Secret;
use latchkey_store::{CredentialStore, Verdict};
use serde::Serialize;
use thiserror::Error;

/// Why a line could not be parsed as a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedLine {
    /// Not exactly two comma-separated fields.
    #[error("expected 2 comma-separated fields, found {found}")]
    FieldCount {
        /// Number of fields on the line.
        found: usize,
    },

    /// One of the two fields is empty after trimming.
    #[error("empty field")]
    EmptyField,

    /// Line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    NotUtf8,

    /// No newline within [`MAX_LINE_LEN`] bytes.
    #[error("line exceeds {MAX_LINE_LEN} bytes")]
    TooLong,
}

/// Longest accepted line, newline excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// Bytes read per attempt: a full line plus its newline.
const LINE_READ_LIMIT: u64 = 1025;

/// One parsed `identity,authorization` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Reading {
    pub identity: String,
    pub authorization: String,
}

// Readings carry plaintext credentials.
impl std::fmt::Debug for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reading").finish_non_exhaustive()
    }
}

/// Parse one protocol line. Surrounding whitespace is trimmed from the line
/// and from each field.
///
/// # Errors
///
/// Returns [`MalformedLine`] for a wrong field count or an empty field.
pub fn parse_message(line: &str) -> Result<Reading, MalformedLine> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    let [identity, authorization] = fields.as_slice() else {
        return Err(MalformedLine::FieldCount {
            found: fields.len(),
        });
    };
    if identity.is_empty() || authorization.is_empty() {
        return Err(MalformedLine::EmptyField);
    }
    Ok(Reading {
        identity: (*identity).to_owned(),
        authorization: (*authorization).to_owned(),
    })
}

/// Per-session counters, printed when the input ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub accepted: u64,
    pub unknown_identity: u64,
    pub bad_value: u64,
    pub malformed: u64,
}

impl SessionStats {
    fn record(&mut self, verdict: Verdict) {
        let counter = match verdict {
            Verdict::Accepted => &mut self.accepted,
            Verdict::RejectedUnknownIdentity => &mut self.unknown_identity,
            Verdict::RejectedBadValue => &mut self.bad_value,
        };
        *counter = counter.saturating_add(1);
    }

    /// Readings that parsed and reached the store.
    #[must_use]
    pub const fn verified(&self) -> u64 {
        self.accepted
            .saturating_add(self.unknown_identity)
            .saturating_add(self.bad_value)
    }
}

/// Verify every reading on `input` until end of stream.
///
/// Blank lines are ignored.
///
/// # Errors
///
/// Returns an error if reading `input` fails or the store reports a fault.
/// Rejected readings are counted, not errors.
pub fn run_session<R: BufRead>(
    store: &CredentialStore,
    secret: &Secret,
    mut input: R,
) -> anyhow::Result<SessionStats> {
    let mut stats = SessionStats::default();
    let mut buf = Vec::new();
    let mut line_no: u64 = 0;

    loop {
        buf.clear();
        let n = input
            .by_ref()
            .take(LINE_READ_LIMIT)
            .read_until(b'\n', &mut buf)
            .context("reading from tag reader")?;
        if n == 0 {
            break;
        }
        line_no = line_no.saturating_add(1);

        let too_long = buf.len() > MAX_LINE_LEN && buf.last() != Some(&b'\n');
        if too_long {
            skip_rest_of_line(&mut input).context("reading from tag reader")?;
        }

        let parsed = if too_long {
            Err(MalformedLine::TooLong)
        } else {
            std::str::from_utf8(&buf)
                .map_err(|_| MalformedLine::NotUtf8)
                .and_then(|line| {
                    if line.trim().is_empty() {
                        Ok(None)
                    } else {
                        parse_message(line).map(Some)
                    }
                })
        };

        let reading = match parsed {
            Ok(Some(reading)) => reading,
            Ok(None) => continue,
            Err(reason) => {
                tracing::warn!(line = line_no, %reason, "skipping malformed line");
                stats.malformed = stats.malformed.saturating_add(1);
                continue;
            }
        };

        let started = Instant::now();
        let verdict = store
            .verify(secret, &reading.identity, &reading.authorization)
            .with_context(|| format!("verifying reading on line {line_no}"))?;
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        let identity = digest(secret, &reading.identity);
        if verdict.is_accepted() {
            tracing::info!(line = line_no, identity = ?identity, ?verdict, elapsed_us, "reading verified");
        } else {
            tracing::warn!(line = line_no, identity = ?identity, ?verdict, elapsed_us, "reading rejected");
        }
        stats.record(verdict);
    }

    tracing::info!(
        accepted = stats.accepted,
        unknown_identity = stats.unknown_identity,
        bad_value = stats.bad_value,
        malformed = stats.malformed,
        "session ended"
    );
    Ok(stats)
}

/// Discard input up to and including the next newline, in buffer-sized
/// steps.
fn skip_rest_of_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let (used, found) = {
            let available = input.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i.saturating_add(1), true),
                None => (available.len(), false),
            }
        };
        input.consume(used);
        if found {
            return Ok(());
        }
    }
}
