//! Process-wide tracing setup.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a `log_level` config value, falling back to `INFO`.
pub fn parse_level(value: &str) -> Level {
    value.trim().parse::<Level>().unwrap_or_else(|_| {
        eprintln!("Warning: unknown log level {value:?}, using info");
        Level::INFO
    })
}

/// Install the global fmt subscriber. Call once, before any work starts.
pub fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(log_level))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {e}"))
}
