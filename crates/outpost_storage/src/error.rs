//! Error types for device storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by backends, record logs and the device database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached beyond the end of the backend.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A table log holds bytes that cannot be an entry.
    #[error("table log corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),

    /// Another process holds the database directory.
    #[error("device database is locked by another process")]
    Locked,

    /// The database (or one of its tables) was closed.
    #[error("device database is closed")]
    Closed,

    /// A table name contains characters that cannot form a file name.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a codec error.
    pub fn codec(msg: impl ToString) -> Self {
        Self::Codec(msg.to_string())
    }

    /// Creates the error returned by tables whose writes were made to fail.
    pub(crate) fn injected() -> Self {
        Self::Io(io::Error::new(io::ErrorKind::Other, "injected write failure"))
    }
}
