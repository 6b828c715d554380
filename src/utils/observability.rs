//! Process-wide tracing subscriber.

use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::Error;
use crate::LogFormat;
use crate::LoggingConfig;
use crate::Result;

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter directive.
///
/// # Errors
/// Fails on an unparsable directive or when a global subscriber is already
/// installed.
pub fn init_observability(config: &LoggingConfig) -> Result<()> {
    let filter = log_filter(config)?;

    let registry = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_names(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
    };
    installed.map_err(|e| Error::InvalidConfig(format!("tracing subscriber: {e}")))?;

    info!("logging initialised ({:?})", config.format);
    Ok(())
}

/// `RUST_LOG` when set and valid, the configured directive otherwise.
pub(crate) fn log_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::InvalidConfig(format!("logging.filter '{}': {}", config.filter, e))),
    }
}
