//! Error types for stores and server APIs.

use outpost_storage::StorageError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for server calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised by stores and the dependency ledger.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The device database failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A DTO or ledger entry could not be converted.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store is not open.
    #[error("store {0} is closed")]
    Closed(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors returned by server calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The request did not reach the server or the connection dropped.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The server answered with an error status.
    #[error("server answered {code}{}", describe_error_code(.error_code))]
    Status {
        /// HTTP status code.
        code: u16,
        /// Application error code from the response body.
        error_code: Option<String>,
    },

    /// The response body did not have the expected shape.
    #[error("cannot decode server response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a status error.
    pub fn status(code: u16, error_code: Option<&str>) -> Self {
        Self::Status {
            code,
            error_code: error_code.map(str::to_string),
        }
    }

    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            Self::Decode(_) => false,
        }
    }

    /// Returns true if the server refused the call because a quota is used up.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Self::Status { code: 403, error_code: Some(code) } if code.starts_with("quota-exceeded-")
        )
    }
}

fn describe_error_code(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ApiError::transport_retryable("connection reset").is_retryable());
        assert!(!ApiError::transport_fatal("bad certificate").is_retryable());
        assert!(ApiError::status(503, None).is_retryable());
        assert!(ApiError::status(429, None).is_retryable());
        assert!(!ApiError::status(400, None).is_retryable());
        assert!(!ApiError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn quota_errors() {
        assert!(ApiError::status(403, Some("quota-exceeded-tags")).is_quota());
        assert!(!ApiError::status(403, Some("forbidden")).is_quota());
        assert!(!ApiError::status(403, None).is_quota());
        assert!(!ApiError::status(500, Some("quota-exceeded-tags")).is_quota());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ApiError::status(403, Some("quota-exceeded-tags")).to_string(),
            "server answered 403 (quota-exceeded-tags)"
        );
        assert_eq!(ApiError::status(502, None).to_string(), "server answered 502");
        assert_eq!(
            StoreError::Closed("tags".into()).to_string(),
            "store tags is closed"
        );
    }
}
