//! Firmware registry data model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest;
use crate::error::{OtaError, OtaResult};
use crate::version::Version;

/// Maximum length of a device type or filename
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Filename used when an upload does not name its artifact
pub const DEFAULT_FILENAME: &str = "firmware.bin";

/// Metadata of a published firmware artifact
///
/// Immutable once published. Unknown or missing fields are rejected on
/// deserialization so a damaged registry document cannot load silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactMetadata {
    /// Device type this firmware targets (e.g. "sensor-v1")
    pub device_type: String,
    /// Firmware version
    pub version: Version,
    /// Sanitized artifact filename
    pub filename: String,
    /// Hex-encoded SHA-256 of the artifact
    pub digest: String,
    /// Artifact size in bytes
    pub size_bytes: u64,
    /// When the artifact was published
    pub uploaded_at: DateTime<Utc>,
    /// Release notes
    pub notes: String,
}

impl ArtifactMetadata {
    /// Structural checks applied when loading a persisted registry
    pub fn validate(&self) -> OtaResult<()> {
        validate_device_type(&self.device_type)?;
        if sanitize_filename(&self.filename)? != self.filename {
            return Err(OtaError::InvalidRequest(format!(
                "filename '{}' is not sanitized",
                self.filename
            )));
        }
        if !digest::is_valid_digest(&self.digest) {
            return Err(OtaError::InvalidRequest(format!(
                "'{}' is not a sha256 digest",
                self.digest
            )));
        }
        Ok(())
    }
}

/// Outcome of an update check
///
/// Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckResult {
    /// Whether the device should update
    pub update_available: bool,
    /// Latest published version, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<Version>,
    /// Metadata of the latest version, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

impl UpdateCheckResult {
    /// Nothing is published for the device type
    pub fn none() -> Self {
        Self {
            update_available: false,
            latest_version: None,
            metadata: None,
        }
    }
}

/// Validated description of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub device_type: String,
    pub version: Version,
    pub filename: String,
    pub notes: String,
}

impl UploadRequest {
    /// Validate the device type and sanitize the filename
    ///
    /// `filename` falls back to [`DEFAULT_FILENAME`] when absent.
    pub fn new(
        device_type: &str,
        version: Version,
        filename: Option<&str>,
        notes: Option<&str>,
    ) -> OtaResult<Self> {
        validate_device_type(device_type)?;
        let filename = sanitize_filename(filename.unwrap_or(DEFAULT_FILENAME))?;
        Ok(Self {
            device_type: device_type.to_string(),
            version,
            filename,
            notes: notes.unwrap_or_default().to_string(),
        })
    }
}

/// Identity of the caller behind a request, used for audit events
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity(Option<String>);

impl Identity {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("anonymous"))
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Check that a device type is usable as a storage directory name
pub fn validate_device_type(device_type: &str) -> OtaResult<()> {
    if device_type.is_empty() || device_type.len() > MAX_IDENTIFIER_LEN {
        return Err(OtaError::InvalidRequest(format!(
            "device type must be 1..={} characters",
            MAX_IDENTIFIER_LEN
        )));
    }
    if device_type.starts_with('.') || !device_type.chars().all(is_identifier_char) {
        return Err(OtaError::InvalidRequest(format!(
            "invalid device type '{}'",
            device_type
        )));
    }
    Ok(())
}

/// Reduce a client-supplied filename to `[A-Za-z0-9._-]`
///
/// Directory components are stripped, whitespace becomes `_`, other
/// characters are dropped and leading dots removed.
pub fn sanitize_filename(name: &str) -> OtaResult<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if is_identifier_char(c) {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = cleaned.chars().take(MAX_IDENTIFIER_LEN).collect();

    if cleaned.is_empty() {
        return Err(OtaError::InvalidRequest(format!(
            "filename '{}' has no usable characters",
            name
        )));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata() -> ArtifactMetadata {
        ArtifactMetadata {
            device_type: "sensor-v1".into(),
            version: Version::parse("1.2.3").unwrap(),
            filename: "fw.bin".into(),
            digest: "ab".repeat(32),
            size_bytes: 3,
            uploaded_at: Utc::now(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("fw.bin").unwrap(), "fw.bin");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\my fw.bin").unwrap(), "my_fw.bin");
        assert_eq!(sanitize_filename(".hidden").unwrap(), "hidden");
        assert_eq!(sanitize_filename("fw(1)é.bin").unwrap(), "fw1.bin");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_validate_device_type() {
        assert!(validate_device_type("sensor-v1").is_ok());
        assert!(validate_device_type("rock_5b.hat").is_ok());
        assert!(validate_device_type("").is_err());
        assert!(validate_device_type("..").is_err());
        assert!(validate_device_type("a/b").is_err());
        assert!(validate_device_type("a b").is_err());
    }

    #[test]
    fn test_upload_request_defaults() {
        let req = UploadRequest::new("sensor-v1", Version::parse("1.0").unwrap(), None, None)
            .unwrap();
        assert_eq!(req.filename, DEFAULT_FILENAME);
        assert_eq!(req.notes, "");
    }

    #[test]
    fn test_metadata_rejects_unknown_fields() {
        let mut value = serde_json::to_value(metadata()).unwrap();
        value["extra"] = serde_json::json!(1);
        assert!(serde_json::from_value::<ArtifactMetadata>(value).is_err());

        let mut value = serde_json::to_value(metadata()).unwrap();
        value.as_object_mut().unwrap().remove("digest");
        assert!(serde_json::from_value::<ArtifactMetadata>(value).is_err());
    }

    #[test]
    fn test_metadata_validate() {
        assert!(metadata().validate().is_ok());

        let mut bad = metadata();
        bad.digest = "xyz".into();
        assert!(bad.validate().is_err());

        let mut bad = metadata();
        bad.filename = "../fw.bin".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::anonymous().to_string(), "anonymous");
        assert_eq!(Identity::named("operator").to_string(), "operator");
    }
}
