//! Process-wide diagnostic logging
//!
//! Output goes to stderr because the line transport usually owns stdout.
//! Records emitted through the `log` facade are forwarded into the same
//! subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

/// Install a stderr subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when the variable is unset or invalid (e.g. `"mcp_duplex=info,tower_http=debug"`).
///
/// Fails if a global subscriber is already installed.
pub fn init(default_filter: &str) -> Result<(), Error> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::ConfigError(format!("Failed to install logger: {}", e)))
}
