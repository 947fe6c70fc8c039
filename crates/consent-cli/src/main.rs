//! consentctl - operator CLI for the consent ledger
//!
//! Maps request, grant, revoke, validate and audit 1:1 onto the consent
//! registry. Denials are printed with their reason code and exit with
//! status 3; integrity failures exit with status 2.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use consent_ledger::{
    telemetry, ConsentRegistry, LedgerConfig, LedgerError, StorageConfig, SystemClock,
};

mod commands;
mod output;

use commands::Command;

/// consentctl application
#[derive(Debug, Parser)]
#[command(name = "consentctl")]
#[command(about = "Consent ledger operator CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONSENT_LEDGER_CONFIG")]
    config: Option<String>,

    /// Ledger file, overrides `storage` from configuration
    #[arg(short, long, env = "CONSENT_LEDGER_PATH")]
    ledger: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    output: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

const EXIT_FAILURE: u8 = 1;
const EXIT_INTEGRITY: u8 = 2;
const EXIT_DENIED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<LedgerError>() {
            Some(LedgerError::Consent(denied)) => {
                output::print_error(&format!(
                    "denied: {} ({})",
                    denied.reason.code(),
                    denied.detail
                ));
                ExitCode::from(EXIT_DENIED)
            }
            Some(ledger_err) if ledger_err.is_fatal() => {
                output::print_error(&format!(
                    "{ledger_err}; do not write to this ledger until it is investigated"
                ));
                ExitCode::from(EXIT_INTEGRITY)
            }
            _ => {
                output::print_error(&format!("{err:#}"));
                ExitCode::from(EXIT_FAILURE)
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.ledger {
        config.storage = StorageConfig::File { path };
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    telemetry::init_tracing(&config.logging)?;

    tracing::debug!(storage = config.storage.label(), "opening consent ledger");
    let registry = ConsentRegistry::open(&config, Arc::new(SystemClock)).await?;

    commands::execute(cli.command, &registry, cli.output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_grant() {
        let cli = Cli::try_parse_from([
            "consentctl",
            "--ledger",
            "/tmp/l.jsonl",
            "grant",
            "req_1",
            "--scope",
            "inventory:SKU1",
            "--expires-in",
            "4h",
            "--condition",
            "weekdays only",
        ])
        .unwrap();
        match cli.command {
            Command::Grant {
                request_id,
                scope,
                expires_in,
                conditions,
                irrevocable,
                ..
            } => {
                assert_eq!(request_id, "req_1");
                assert_eq!(scope.as_deref(), Some("inventory:SKU1"));
                assert_eq!(expires_in.as_deref(), Some("4h"));
                assert_eq!(conditions, vec!["weekdays only".to_string()]);
                assert!(!irrevocable);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_expiry_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "consentctl",
            "grant",
            "req_1",
            "--expires-in",
            "4h",
            "--expires-at",
            "2030-01-01T00:00:00Z",
        ]);
        assert!(parsed.is_err());
    }
}
