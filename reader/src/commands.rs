//! Subcommand implementations.

use std::cell::Cell;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use latchkey_crypto_core::challenge::{Authenticator, NonceRegistry, Outcome};
use latchkey_crypto_core::digest::Digest;
use latchkey_crypto_core::secret::{Secret, SecretFile};
use latchkey_store::{load_seed_file, CredentialStore, SeedRecord};
use serde::Serialize;

use crate::cli::Command;
use crate::config::ReaderConfig;
use crate::session;

/// Dispatch one subcommand.
///
/// # Errors
///
/// Returns an error for any secret, store, or I/O fault. Rejections are
/// reported through the exit code instead.
pub fn run(command: Command, config: &ReaderConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Serve {
            input,
            challenge,
            no_challenge,
        } => {
            let authenticate = !no_challenge && (challenge || input.is_some());
            serve(config, input, authenticate)
        }
        Command::Check {
            identity,
            authorization,
        } => check(config, &identity, &authorization),
        Command::Enroll {
            identity,
            authorization,
        } => enroll(config, &identity, &authorization),
        Command::Revoke { identity, digest } => revoke(config, identity, digest),
        Command::RotateSecret { confirm, reseed } => rotate_secret(config, confirm, reseed),
        Command::Challenge => challenge(config),
        Command::Status => status(config),
    }
}

// ---------------------------------------------------------------------------
// Start-up
// ---------------------------------------------------------------------------

/// Secret and store, ready for use.
struct Reader {
    secret: Secret,
    store: CredentialStore,
}

/// Load (or create) the secret, open the store, and seed it on first use.
fn open_reader(config: &ReaderConfig) -> anyhow::Result<Reader> {
    let secret = load_secret(config)?;
    let mut store = open_store(config)?;

    let seeds = load_seeds(config)?;
    if store.initialize_if_needed(&secret, &seeds)? {
        tracing::info!(records = seeds.len(), "seeded new credential store");
    }
    Ok(Reader { secret, store })
}

fn load_secret(config: &ReaderConfig) -> anyhow::Result<Secret> {
    let file = SecretFile::new(config.secret_path.clone());
    let created = !file.exists();
    let secret = file
        .load_or_create()
        .with_context(|| format!("loading secret {}", config.secret_path.display()))?;
    if created {
        tracing::info!(path = %config.secret_path.display(), "generated new reader secret");
    }
    Ok(secret)
}

fn open_store(config: &ReaderConfig) -> anyhow::Result<CredentialStore> {
    CredentialStore::open(&config.store_path, config.store_size_limit_bytes)
        .with_context(|| format!("opening credential store {}", config.store_path.display()))
}

fn load_seeds(config: &ReaderConfig) -> anyhow::Result<Vec<SeedRecord>> {
    match &config.seed_path {
        Some(path) => load_seed_file(path)
            .with_context(|| format!("loading seed file {}", path.display())),
        None => Ok(Vec::new()),
    }
}

const fn exit_for(accepted: bool) -> ExitCode {
    if accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Credential commands
// ---------------------------------------------------------------------------

fn serve(
    config: &ReaderConfig,
    input: Option<PathBuf>,
    authenticate: bool,
) -> anyhow::Result<ExitCode> {
    let reader = open_reader(config)?;
    let registry = NonceRegistry::new();

    let stats = match input {
        Some(path) => {
            tracing::info!(input = %path.display(), authenticate, "reading from device");
            let device = OpenOptions::new()
                .read(true)
                .write(authenticate)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let reply = if authenticate {
                Some(device.try_clone().context("cloning device handle")?)
            } else {
                None
            };
            serve_peer(&reader, &registry, BufReader::new(device), reply)?
        }
        None => {
            tracing::info!(authenticate, "reading from stdin");
            serve_peer(
                &reader,
                &registry,
                io::stdin().lock(),
                authenticate.then(io::stdout),
            )?
        }
    };

    let Some(stats) = stats else {
        return Ok(ExitCode::FAILURE);
    };
    println!("{}", serde_json::to_string(&stats)?);
    Ok(ExitCode::SUCCESS)
}

/// Challenge the peer over `reply`/`input` when `reply` is given, then
/// verify its readings. `None` means the peer failed the challenge and no
/// reading was looked up.
fn serve_peer<R: BufRead, W: Write>(
    reader: &Reader,
    registry: &NonceRegistry,
    mut input: R,
    reply: Option<W>,
) -> anyhow::Result<Option<session::SessionStats>> {
    if let Some(reply) = reply {
        let outcome = run_challenge(&reader.secret, registry, &mut input, reply)?;
        if !outcome.is_accepted() {
            tracing::warn!("refusing session from unauthenticated peer");
            return Ok(None);
        }
    }
    session::run_session(&reader.store, &reader.secret, input).map(Some)
}

fn check(config: &ReaderConfig, identity: &str, authorization: &str) -> anyhow::Result<ExitCode> {
    let reader = open_reader(config)?;
    let verdict = reader
        .store
        .verify(&reader.secret, identity, authorization)?;
    println!("{}", serde_json::to_string(&verdict)?);
    Ok(exit_for(verdict.is_accepted()))
}

fn enroll(config: &ReaderConfig, identity: &str, authorization: &str) -> anyhow::Result<ExitCode> {
    let mut reader = open_reader(config)?;
    reader
        .store
        .upsert(&reader.secret, identity, authorization)
        .context("enrolling credential")?;
    Ok(ExitCode::SUCCESS)
}

fn revoke(
    config: &ReaderConfig,
    identity: Option<String>,
    digest_hex: Option<String>,
) -> anyhow::Result<ExitCode> {
    let mut reader = open_reader(config)?;
    let removed = match (identity, digest_hex) {
        (Some(identity), _) => reader.store.revoke(&reader.secret, &identity)?,
        (None, Some(hex)) => {
            let raw = HEXLOWER_PERMISSIVE
                .decode(hex.trim().as_bytes())
                .context("identity digest is not valid hex")?;
            let digest = Digest::from_slice(&raw).context("identity digest has wrong length")?;
            reader.store.revoke_digest(&digest)?
        }
        (None, None) => bail!("revoke needs an identity or --digest"),
    };
    if !removed {
        tracing::warn!("no credential matched; nothing revoked");
    }
    Ok(exit_for(removed))
}

// ---------------------------------------------------------------------------
// Secret rotation
// ---------------------------------------------------------------------------

fn rotate_secret(config: &ReaderConfig, confirm: bool, reseed: bool) -> anyhow::Result<ExitCode> {
    if !confirm {
        bail!("rotating the secret makes every stored credential unverifiable; pass --confirm");
    }
    let secret_file = SecretFile::new(config.secret_path.clone());

    if !reseed {
        let store = open_store(config)?;
        secret_file
            .rotate(None)
            .with_context(|| format!("rotating secret {}", config.secret_path.display()))?;
        tracing::warn!(
            path = %config.secret_path.display(),
            records = store.record_count()?,
            "reader secret rotated; existing credentials no longer verify"
        );
        return Ok(ExitCode::SUCCESS);
    }

    if config.seed_path.is_none() {
        bail!("--reseed needs seedPath in the config");
    }
    let seeds = load_seeds(config)?;
    let mut store = open_store(config)?;
    let old_secret = load_secret(config)?;
    let new_secret = Secret::generate()?;

    // The new secret reaches disk only inside the rebuild transaction, after
    // every re-seeded record has been written.
    let persisted = Cell::new(false);
    let rebuilt = store.rebuild_with(&new_secret, &seeds, || {
        secret_file.rotate(Some(new_secret.clone()))?;
        persisted.set(true);
        Ok(())
    });
    if let Err(e) = rebuilt {
        if persisted.get() {
            secret_file
                .rotate(Some(old_secret))
                .context("restoring previous secret after failed rebuild")?;
            tracing::warn!("rebuild failed at commit; previous secret restored");
        }
        return Err(e).context("rebuilding credential store under a new secret");
    }

    tracing::warn!(
        path = %config.secret_path.display(),
        records = seeds.len(),
        "reader secret rotated and credential store rebuilt"
    );
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Challenge-response
// ---------------------------------------------------------------------------

fn challenge(config: &ReaderConfig) -> anyhow::Result<ExitCode> {
    let secret = load_secret(config)?;
    let registry = NonceRegistry::new();
    let outcome = run_challenge(&secret, &registry, io::stdin().lock(), io::stdout().lock())?;
    Ok(exit_for(outcome.is_accepted()))
}

/// Write a hex nonce line to `output`, read one hex response line from
/// `input`, and print the outcome.
///
/// Undecodable hex is treated as a wrong response.
fn run_challenge<R: BufRead, W: Write>(
    secret: &Secret,
    registry: &NonceRegistry,
    mut input: R,
    mut output: W,
) -> anyhow::Result<Outcome> {
    let mut auth = Authenticator::new(secret, registry);
    let nonce = auth.issue_challenge()?;
    writeln!(output, "{}", HEXLOWER.encode(nonce.as_bytes()))?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line).context("reading challenge response")? == 0 {
        bail!("peer closed the channel before responding");
    }
    let candidate = HEXLOWER_PERMISSIVE
        .decode(line.trim().as_bytes())
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "challenge response is not valid hex");
            Vec::new()
        });

    let outcome = auth.verify(&candidate)?;
    match outcome {
        Outcome::Accepted => tracing::info!(?nonce, "peer authenticated"),
        Outcome::Rejected => tracing::warn!(?nonce, "peer failed challenge"),
    }
    writeln!(
        output,
        "{}",
        if outcome.is_accepted() { "accepted" } else { "rejected" }
    )?;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    secret_path: PathBuf,
    secret_present: bool,
    store_path: PathBuf,
    store_present: bool,
    size_limit_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initialized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<u64>,
}

/// Report without creating a secret or seeding the store.
fn collect_status(config: &ReaderConfig) -> anyhow::Result<Status> {
    let store_present = config.store_path.exists();
    let mut status = Status {
        secret_path: config.secret_path.clone(),
        secret_present: SecretFile::new(config.secret_path.clone()).exists(),
        store_path: config.store_path.clone(),
        store_present,
        size_limit_bytes: config.store_size_limit_bytes,
        schema_version: None,
        initialized: None,
        records: None,
    };
    if store_present {
        let store = open_store(config)?;
        status.schema_version = Some(store.schema_version()?);
        status.initialized = Some(store.is_initialized()?);
        status.records = Some(store.record_count()?);
    }
    Ok(status)
}

fn status(config: &ReaderConfig) -> anyhow::Result<ExitCode> {
    let status = collect_status(config)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}
