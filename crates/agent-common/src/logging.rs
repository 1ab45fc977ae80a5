// Process-wide `tracing` subscriber setup.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (e.g. `"debug"`) is used.
/// Fails if a subscriber was already installed.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = build_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level.trim().to_ascii_lowercase())
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))
}
