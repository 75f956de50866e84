//! Log output setup.

use tracing::Level;

use crate::error::{ProxyError, Result};

/// Maps a log level name onto a tracing level.
///
/// Accepts the names used by the wider Kubernetes tooling, including `panic`
/// and `fatal`, which both map to `ERROR`.
pub fn parse_level(name: &str) -> Result<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "panic" | "fatal" | "error" => Ok(Level::ERROR),
        "warn" | "warning" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        other => Err(ProxyError::Config(format!("unknown log level '{}'", other))),
    }
}

pub fn init(level: Level) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();
}
