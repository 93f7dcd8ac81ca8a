use std::env;

use thiserror::Error;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "FOLIO_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

fn create_env_filter(verbose: bool) -> EnvFilter {
    let from_env = env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| (LOG_ENV, v))
        .or_else(|| {
            env::var(EnvFilter::DEFAULT_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (EnvFilter::DEFAULT_ENV, v))
        });

    if let Some((name, directives)) = from_env {
        match EnvFilter::try_new(&directives) {
            Ok(filter) => return filter,
            // Logging is not up yet.
            Err(err) => eprintln!("Failed to parse {} '{}': {}", name, directives, err),
        }
    }

    EnvFilter::new(if verbose { "debug" } else { DEFAULT_FILTER })
}

/// Installs the global subscriber (env filter + fmt to stderr) and routes
/// `log` records into it.
pub fn init(verbose: bool) -> Result<(), LoggingError> {
    LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbose))
        .with_writer(std::io::stderr)
        .finish();
    set_global_default(subscriber)?;

    Ok(())
}
