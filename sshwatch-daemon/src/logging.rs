//! Logging initialization for sshwatch-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `SshwatchConfig`. `RUST_LOG`, when set, wins over the configured level.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use sshwatch_core::config::GeneralConfig;

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - one JSON object per line (default)
/// * `"pretty"` - human-readable multi-line output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let fmt_layer = match config.log_format.as_str() {
        "json" => fmt::layer().json().with_current_span(false).boxed(),
        "pretty" => fmt::layer().pretty().boxed(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            ));
        }
    };

    tracing_subscriber::registry()
        .with(build_filter(&config.log_level))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
