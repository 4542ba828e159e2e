//! Error types for OTA client operations

use ota_core::OtaError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for OTA client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during OTA client operations
///
/// Everything except configuration problems is retryable by the caller: a
/// failed check or download leaves no state behind that a retry could trip
/// over.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Server returned an error response
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Device type or version unknown to the server
    #[error("Not found: {0}")]
    NotFound(String),

    /// Version already published
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or rejected bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Transfer ended before the declared length arrived
    #[error("Transfer incomplete: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    /// Timeout
    #[error("Request timed out")]
    Timeout,

    /// Operation not valid in the current update state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Local integrity or validation failure
    #[error(transparent)]
    Core(#[from] OtaError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::InvalidUrl(_) | ClientError::Config(_) | ClientError::InvalidState(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::HttpError(err)
        }
    }
}
