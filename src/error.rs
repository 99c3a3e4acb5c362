//! Relay error types.

use std::io;

/// Top-level relay error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config: {0}")]
    Config(String),
    #[error("bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("dial {addr}: {source}")]
    Dial { addr: String, source: io::Error },
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("task pool saturated")]
    PoolSaturated,
}
