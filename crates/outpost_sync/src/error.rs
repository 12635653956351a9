//! Error types for the session.

use outpost_storage::StorageError;
use outpost_store::StoreError;
use thiserror::Error;

/// Result type for session operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The device database failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A store with the same name is already part of the session.
    #[error("store {0} is already registered")]
    AlreadyRegistered(String),

    /// The session was closed.
    #[error("session is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_store() {
        let err = SyncError::AlreadyRegistered("tags".into());
        assert_eq!(err.to_string(), "store tags is already registered");
        assert_eq!(SyncError::Closed.to_string(), "session is closed");
    }

    #[test]
    fn store_errors_convert() {
        let err: SyncError = StoreError::Closed("tags".into()).into();
        assert!(matches!(err, SyncError::Store(_)));
    }
}
