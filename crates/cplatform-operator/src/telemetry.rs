//! Logging setup

use crate::config::LoggingConfig;
use crate::error::{OperatorError, Result};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `Ok(false)` when a
/// subscriber was already installed (e.g. by a test harness).
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    let installed = if config.json {
        subscriber.json().try_init().is_ok()
    } else {
        subscriber.try_init().is_ok()
    };
    Ok(installed)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            OperatorError::InvalidConfig(format!("logging.level '{}': {}", config.level, e))
        }),
    }
}
