//! Tracing setup for embedders that want NornicDB's internal spans surfaced.

use crate::error::{NornicError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global `tracing` subscriber filtered by `level` (e.g.
/// `"info"`, `"nornicdb=debug"`). Safe to call once per process; a second
/// call returns an error rather than panicking.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| NornicError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| NornicError::InvalidArgument("logging already initialized".into()))
}
