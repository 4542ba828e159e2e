//! Error taxonomy shared by the registry, artifact store and update service

use std::io;

use thiserror::Error;

/// Result type for OTA core operations
pub type OtaResult<T> = Result<T, OtaError>;

/// Errors that can occur while storing, indexing or serving firmware
///
/// Messages never embed filesystem paths so they can be surfaced to remote
/// callers as-is.
#[derive(Debug, Error)]
pub enum OtaError {
    /// Unknown device type, version or artifact
    #[error("Not found: {0}")]
    NotFound(String),

    /// Publish conflict: the version already exists for this device type
    #[error("Version {version} already exists for device type {device_type}")]
    VersionAlreadyExists {
        device_type: String,
        version: String,
    },

    /// Latest-version resolution over an empty set
    #[error("No versions available")]
    EmptyVersionSet,

    /// Integrity failure
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Storage substrate ran out of space
    #[error("Insufficient storage space")]
    DiskFull,

    /// Upload exceeds the configured size ceiling
    #[error("Payload exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: u64 },

    /// Resume offset past the end of the artifact
    #[error("Requested offset {offset} is beyond artifact size {size}")]
    RangeNotSatisfiable { offset: u64, size: u64 },

    /// Replacing a published version is disabled on this server
    #[error("Replacing published firmware is not allowed")]
    ReplaceNotAllowed,

    /// Persisted registry failed structural validation
    #[error("Corrupt registry: {0}")]
    CorruptRegistry(String),

    /// Malformed request (bad identifier, empty payload, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport-level timeout, treated as an I/O failure by callers
    #[error("Operation timed out")]
    Timeout,

    /// Any other I/O failure
    #[error("I/O failure: {0}")]
    Io(#[source] io::Error),
}

impl OtaError {
    /// Create a not found error for a device type / version pair
    pub fn firmware_not_found(device_type: &str, version: &str) -> Self {
        Self::NotFound(format!("firmware {} {}", device_type, version))
    }

    /// Whether the error leaves nothing behind and can simply be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OtaError::Timeout
                | OtaError::Io(_)
                | OtaError::DiskFull
                | OtaError::DigestMismatch { .. }
        )
    }
}

impl From<io::Error> for OtaError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => OtaError::DiskFull,
            io::ErrorKind::TimedOut => OtaError::Timeout,
            _ => OtaError::Io(err),
        }
    }
}
