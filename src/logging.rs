//! Log subscriber setup

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` is honoured; the configured level is added on top of it.
/// Per-flow spans are reported when they close.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let level: Level = config.level.parse().unwrap_or(Level::INFO);

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.target)
        .with_span_events(FmtSpan::CLOSE);

    let result = if config.is_json() {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
