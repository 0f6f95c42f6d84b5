//! Diagnostic logging on stderr.
//!
//! Stdout carries the attach artifact and nothing else, so every log line
//! goes to stderr.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when none is configured or the configured one is invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global subscriber. An unparsable `filter` falls back to
/// [`DEFAULT_LOG_FILTER`].
///
/// # Errors
///
/// Returns [`TryInitError`] when a global subscriber is already installed.
pub fn init(filter: &str, json: bool) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(false)
                    .with_target(false),
            )
            .try_init()
    }
}
