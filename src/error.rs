use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building the model tables, iterating the policy,
/// or reading/writing checkpoints.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration. Raised at startup, never recoverable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A table lookup returned zero rows where the table invariants
    /// require exactly one. Indicates a bug in table construction.
    #[error("missing table row: {0}")]
    MissingRow(String),

    /// A state key read back from disk did not parse as `AA_BB`.
    #[error("malformed state key {key:?}")]
    BadStateKey { key: String },

    /// A file sits where a directory is expected, or the reverse.
    #[error("path collision at {path}: {reason}")]
    PathCollision { path: PathBuf, reason: String },

    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint (de)serialization failed: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
