//! Runner error types.

use std::path::PathBuf;
use thiserror::Error;

/// Runner errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The description file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The description file is not a valid table list.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Connecting to the database failed.
    #[error("connection error: {0}")]
    Connect(#[from] sqlx::Error),

    /// Synchronization failed.
    #[error(transparent)]
    Sync(#[from] schemasync_core::Error),
}

impl CliError {
    /// Whether restarting without changing the description may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CliError::Connect(_) => true,
            CliError::Sync(e) => e.is_retryable(),
            CliError::Read { .. } | CliError::Parse { .. } => false,
        }
    }
}
