//! LATCHKEY reader host binary.
//!
//! Loads the config, sets up logging, and dispatches one subcommand against
//! the secret file and credential store.

mod cli;
mod commands;
mod config;
mod logging;
mod session;

use std::process::ExitCode;

use anyhow::Context;
use latchkey_crypto_core::disable_core_dumps;

use crate::cli::Cli;
use crate::config::ReaderConfig;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse_args();

    let config = ReaderConfig::load(&cli.config)?;
    config.ensure_data_dirs()?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let _guard = logging::init(level, config.log_dir.as_deref()).context("setting up logging")?;

    if let Err(e) = disable_core_dumps() {
        tracing::warn!(error = %e, "could not disable core dumps");
    }

    tracing::info!("latchkey reader v{}", env!("CARGO_PKG_VERSION"));
    commands::run(cli.command, &config)
}
