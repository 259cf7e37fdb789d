//! Logger setup — `tracing` with an env-filter, writing to stderr.
//!
//! Stderr is mandatory here: stdout belongs to the stdio channel's
//! line-oriented JSON replies and must never interleave with log lines.
//! `RUST_LOG` takes precedence over the configured level when set.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialize the global subscriber at `level` (e.g. `"info"`, `"debug"`).
///
/// Errors if `level` is not a valid filter directive or if a subscriber was
/// already installed (calling twice is a programming error).
pub fn init(level: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log filter {level:?}: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber init failed: {e}")))
}
