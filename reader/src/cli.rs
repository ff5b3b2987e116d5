//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// LATCHKEY tag reader host.
#[derive(Parser, Debug)]
#[command(name = "latchkey")]
#[command(about = "Verifies tag readings against the local credential store")]
#[command(version)]
pub struct Cli {
    /// Path of the JSON config file.
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log filter (trace, debug, info, warn, error). Overrides the config.
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Verify `identity,authorization` lines until end of input.
    Serve {
        /// Serial device or file to read from (stdin when omitted). The
        /// device's line settings must be configured beforehand.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Challenge the peer before reading. On by default for `--input`.
        #[arg(long, conflicts_with = "no_challenge")]
        challenge: bool,

        /// Skip the challenge, e.g. when `--input` is a plain file.
        #[arg(long)]
        no_challenge: bool,
    },

    /// Verify a single pair and print the verdict.
    Check {
        identity: String,
        authorization: String,
    },

    /// Enroll an identity, or replace its authorization value.
    Enroll {
        identity: String,
        authorization: String,
    },

    /// Remove an identity by plaintext or by hex digest.
    #[command(group(ArgGroup::new("target").required(true).args(["identity", "digest"])))]
    Revoke {
        identity: Option<String>,

        /// Hex-encoded identity digest.
        #[arg(long)]
        digest: Option<String>,
    },

    /// Replace the secret. Every stored credential becomes unverifiable.
    RotateSecret {
        /// Required acknowledgement that rotation is destructive.
        #[arg(long)]
        confirm: bool,

        /// Rebuild the store from the configured seed file afterwards.
        #[arg(long)]
        reseed: bool,
    },

    /// Authenticate the peer on stdio: print a nonce, read its response.
    Challenge,

    /// Print secret and store status as JSON.
    Status,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["latchkey", "status"]);
        assert_eq!(cli.config, PathBuf::from("latchkey.json"));
        assert_eq!(cli.log_level, None);
        assert_eq!(cli.command, Command::Status);
    }

    #[test]
    fn serve_with_device() {
        let cli = Cli::parse_from(["latchkey", "serve", "--input", "/dev/ttyACM0"]);
        assert_eq!(
            cli.command,
            Command::Serve {
                input: Some(PathBuf::from("/dev/ttyACM0")),
                challenge: false,
                no_challenge: false,
            }
        );
    }

    #[test]
    fn serve_challenge_flags_conflict() {
        assert!(Cli::try_parse_from(["latchkey", "serve", "--challenge", "--no-challenge"]).is_err());
        let cli = Cli::parse_from(["latchkey", "serve", "--input", "log.txt", "--no-challenge"]);
        assert!(matches!(cli.command, Command::Serve { no_challenge: true, .. }));
    }

    #[test]
    fn check_takes_two_positionals() {
        let cli = Cli::parse_from(["latchkey", "check", "John", "Doe"]);
        assert_eq!(
            cli.command,
            Command::Check {
                identity: "John".into(),
                authorization: "Doe".into()
            }
        );
        assert!(Cli::try_parse_from(["latchkey", "check", "John"]).is_err());
    }

    #[test]
    fn revoke_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["latchkey", "revoke"]).is_err());
        assert!(Cli::try_parse_from(["latchkey", "revoke", "John", "--digest", "ab"]).is_err());
        let cli = Cli::parse_from(["latchkey", "revoke", "--digest", "abcd"]);
        assert_eq!(
            cli.command,
            Command::Revoke {
                identity: None,
                digest: Some("abcd".into())
            }
        );
    }

    #[test]
    fn rotate_secret_flags() {
        let cli = Cli::parse_from(["latchkey", "rotate-secret", "--confirm", "--reseed"]);
        assert_eq!(
            cli.command,
            Command::RotateSecret {
                confirm: true,
                reseed: true
            }
        );
    }

    #[test]
    fn global_options_before_subcommand() {
        let cli = Cli::parse_from(["latchkey", "-c", "/etc/latchkey.json", "--log-level", "debug", "challenge"]);
        assert_eq!(cli.config, PathBuf::from("/etc/latchkey.json"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
