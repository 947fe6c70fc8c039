//! Tracing initialization

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{LedgerError, Result};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Output goes to stderr so command output on stdout stays machine readable.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LedgerError::Config(format!("invalid log level '{}': {e}", config.level)))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false);
        subscriber.with(fmt_layer).try_init()
    };

    installed.map_err(|e| LedgerError::Config(format!("tracing already initialised: {e}")))
}
