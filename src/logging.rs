use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

/// Installs the global fmt subscriber. `verbose` forces debug output.
pub fn init(level: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        parse_level(level)?
    };
    let _ = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}

fn parse_level(value: &str) -> Result<Level> {
    value
        .trim()
        .parse::<Level>()
        .map_err(|_| anyhow!("invalid log level '{}'", value))
}
