//! Error types for remote sync calls.

use thiserror::Error;

use comanda_core::sync::{classify_http_status, RetryClass};

/// Result type alias for remote sync operations.
pub type Result<T> = std::result::Result<T, SyncApiError>;

/// Errors that can occur while pushing a mutation to the backend.
#[derive(Debug, Error)]
pub enum SyncApiError {
    /// HTTP client error (connect failure, timeout, broken body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SyncApiError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify the error for retry policy.
    ///
    /// Transport failures are always `Transient`: a timed-out call may or may
    /// not have been applied remotely, so it is retried under the same
    /// idempotency key rather than surfaced as a conflict.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => RetryClass::Transient,
            Self::Json(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_drives_retry_class() {
        assert_eq!(SyncApiError::api(503, "down").retry_class(), RetryClass::Transient);
        assert_eq!(SyncApiError::api(409, "stale").retry_class(), RetryClass::Conflict);
        assert_eq!(SyncApiError::api(400, "bad").retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn invalid_request_is_permanent() {
        let err = SyncApiError::invalid_request("empty payload");
        assert_eq!(err.retry_class(), RetryClass::Permanent);
        assert!(err.status_code().is_none());
    }
}
