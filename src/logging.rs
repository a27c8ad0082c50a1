// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. the explicit `level` argument (if provided)
//! 2. `BATCHPOOL_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! The library itself only emits `tracing` events; calling this is optional
//! and mostly useful in binaries and tests.

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;

/// Initialise a global logging subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init(level: Option<tracing::Level>) -> Result<()> {
    let level = match level {
        Some(level) => level,
        None => std::env::var("BATCHPOOL_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
