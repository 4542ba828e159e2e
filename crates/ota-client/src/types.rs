//! Wire types of the OTA REST API

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ota_core::{ArtifactMetadata, Version};
use serde::{Deserialize, Serialize};

/// Response of `GET /api/v1/check_update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckUpdateResponse {
    pub update_available: bool,
    #[serde(default)]
    pub latest_version: Option<Version>,
    #[serde(default)]
    pub current_version: Option<Version>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<ArtifactMetadata>,
}

/// Response of `GET /api/v1/firmware`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareIndex {
    pub device_types: BTreeMap<String, Vec<ArtifactMetadata>>,
}

/// Response of `GET /api/v1/firmware/{device_type}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFirmware {
    pub device_type: String,
    pub latest_version: Version,
    pub versions: Vec<ArtifactMetadata>,
}

/// Error body returned by the server
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A fully received, not yet verified download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    path: PathBuf,
    metadata: ArtifactMetadata,
}

impl DownloadedFile {
    pub(crate) fn new(path: PathBuf, metadata: ArtifactMetadata) -> Self {
        Self { path, metadata }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata the download was requested for
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}
