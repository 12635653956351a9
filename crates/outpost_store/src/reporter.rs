//! Reporting of server failures to the application.

use crate::error::ApiError;
use parking_lot::Mutex;

/// Context key of a failed bulk create.
pub const CREATE_ITEMS: &str = "errors.stores.create_items";
/// Context key of a failed bulk delete.
pub const DELETE_ITEMS: &str = "errors.stores.delete_items";
/// Context key of a failed pull or listing.
pub const GET_UPDATES: &str = "errors.stores.get_updates";
/// Context key of a failed update push.
pub const SEND_UPDATES: &str = "errors.stores.send_updates";

/// Receives the server failures of sync passes, e.g. to show them to the user.
pub trait ErrorReporter: Send + Sync {
    /// A server call of `store` failed; `context` is one of the
    /// `errors.stores.*` keys.
    fn network_error(&self, store: &str, context: &'static str, error: &ApiError);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn network_error(&self, store: &str, context: &'static str, error: &ApiError) {
        tracing::error!(store, context, error = %error, "server call failed");
    }
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedError {
    /// Store whose pass failed.
    pub store: String,
    /// `errors.stores.*` key.
    pub context: &'static str,
    /// The failure.
    pub error: ApiError,
}

/// Reporter keeping every failure in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ReportedError>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures reported so far.
    pub fn reports(&self) -> Vec<ReportedError> {
        self.reports.lock().clone()
    }

    /// Contexts reported so far, in order.
    pub fn contexts(&self) -> Vec<&'static str> {
        self.reports.lock().iter().map(|r| r.context).collect()
    }
}

impl ErrorReporter for RecordingReporter {
    fn network_error(&self, store: &str, context: &'static str, error: &ApiError) {
        TracingReporter.network_error(store, context, error);
        self.reports.lock().push(ReportedError {
            store: store.to_string(),
            context,
            error: error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        reporter.network_error("tags", CREATE_ITEMS, &ApiError::transport_retryable("down"));
        reporter.network_error("tags", GET_UPDATES, &ApiError::status(500, None));
        assert_eq!(reporter.contexts(), vec![CREATE_ITEMS, GET_UPDATES]);
        assert_eq!(reporter.reports()[1].error, ApiError::status(500, None));
    }
}
