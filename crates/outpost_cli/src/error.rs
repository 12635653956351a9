//! Errors reported by the CLI.

use outpost_storage::StorageError;
use outpost_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Everything a command can fail with.
#[derive(Error, Debug)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("database path required for {0}")]
    PathRequired(&'static str),

    /// Nothing to inspect at the given path.
    #[error("no database found at {}", .0.display())]
    NotFound(PathBuf),

    /// The device database failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The dependency ledger could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Output could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading the directory failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
