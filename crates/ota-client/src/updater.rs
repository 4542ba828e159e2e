//! Device-side update state machine
//!
//! ```text
//! Idle → Checking → UpToDate
//!                 → Downloading → Verifying → Ready
//!                                           → Rejected
//! ```
//!
//! Every step can be driven individually or all at once with
//! [`UpdateClient::update`]. Network failures return the machine to `Idle`
//! with the error handed to the caller; nothing retries on its own.
//!
//! Only a [`ReadyArtifact`] (downloaded in full and digest-verified) exposes
//! a file path meant for flashing. A digest mismatch deletes the download.

use std::fmt;
use std::path::{Path, PathBuf};

use ota_core::{digest, ArtifactMetadata, Version};
use tracing::{info, warn};

use crate::client::OtaClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::{CheckUpdateResponse, DownloadedFile};

/// States of the update state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    UpToDate,
    Downloading,
    Verifying,
    Ready,
    Rejected,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::UpToDate => "up-to-date",
            UpdateState::Downloading => "downloading",
            UpdateState::Verifying => "verifying",
            UpdateState::Ready => "ready",
            UpdateState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A downloaded artifact whose digest matched; safe to flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyArtifact {
    path: PathBuf,
    metadata: ArtifactMetadata,
}

impl ReadyArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn version(&self) -> &Version {
        &self.metadata.version
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Result of a full update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The device already runs the latest version
    UpToDate,
    /// A verified artifact is waiting to be flashed
    Ready(ReadyArtifact),
    /// The download did not match its digest and was deleted
    Rejected {
        version: Version,
        expected_digest: String,
        actual_digest: String,
    },
}

/// Device-side update driver
#[derive(Debug)]
pub struct UpdateClient {
    client: OtaClient,
    device_type: String,
    current_version: Option<Version>,
    download_dir: PathBuf,
    state: UpdateState,
    /// Metadata of the update found by the last check
    pending: Option<ArtifactMetadata>,
    ready: Option<ReadyArtifact>,
}

impl UpdateClient {
    pub fn new(
        client: OtaClient,
        device_type: impl Into<String>,
        current_version: Option<Version>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            device_type: device_type.into(),
            current_version,
            download_dir: download_dir.into(),
            state: UpdateState::Idle,
            pending: None,
            ready: None,
        }
    }

    /// Build an update client from a [`ClientConfig`]
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = OtaClient::from_config(config)?;
        let current_version = config
            .device
            .current_version
            .as_deref()
            .map(Version::parse)
            .transpose()?;
        Ok(Self::new(
            client,
            &config.device.device_type,
            current_version,
            &config.storage.download_dir,
        ))
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn current_version(&self) -> Option<&Version> {
        self.current_version.as_ref()
    }

    /// Record the version now installed (after flashing)
    pub fn set_current_version(&mut self, version: Version) {
        self.current_version = Some(version);
    }

    /// Update found by the last check, if any
    pub fn pending(&self) -> Option<&ArtifactMetadata> {
        self.pending.as_ref()
    }

    pub fn client(&self) -> &OtaClient {
        &self.client
    }

    /// Ask the server for a newer version
    ///
    /// On failure the machine returns to `Idle` and the error is returned.
    pub async fn check_for_update(&mut self) -> Result<CheckUpdateResponse> {
        self.state = UpdateState::Checking;
        self.pending = None;

        let response = match self
            .client
            .check_update(&self.device_type, self.current_version.as_ref())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(device_type = %self.device_type, error = %e, "Update check failed");
                self.state = UpdateState::Idle;
                return Err(e);
            }
        };

        if response.update_available {
            info!(
                device_type = %self.device_type,
                latest = ?response.latest_version.as_ref().map(Version::as_str),
                "Update available"
            );
            self.pending = response.metadata.clone();
            self.state = UpdateState::Idle;
        } else {
            self.state = UpdateState::UpToDate;
        }
        Ok(response)
    }

    /// Download one version to local storage
    ///
    /// Uses the metadata of the last check when it matches `version`. An
    /// interrupted transfer leaves only a partial file that the next call
    /// resumes; it is never returned as complete.
    pub async fn download_firmware(&mut self, version: &Version) -> Result<DownloadedFile> {
        self.state = UpdateState::Downloading;

        let result = async {
            let metadata = match &self.pending {
                Some(pending) if &pending.version == version => pending.clone(),
                _ => self.client.get_firmware(&self.device_type, version).await?,
            };
            self.client
                .download_artifact(&metadata, &self.download_dir)
                .await
        }
        .await;

        match result {
            Ok(file) => Ok(file),
            Err(e) => {
                warn!(version = %version, error = %e, "Download failed");
                self.state = UpdateState::Idle;
                Err(e)
            }
        }
    }

    /// Check a download against the expected digest
    ///
    /// `true` moves the machine to `Ready`. `false` deletes the file and
    /// moves it to `Rejected`; the same version may be downloaded again.
    pub async fn verify_firmware(
        &mut self,
        artifact: DownloadedFile,
        expected_digest: &str,
    ) -> Result<bool> {
        match self.verify_inner(artifact, expected_digest).await? {
            None => Ok(true),
            Some(_) => Ok(false),
        }
    }

    /// Returns the actual digest on mismatch
    async fn verify_inner(
        &mut self,
        artifact: DownloadedFile,
        expected_digest: &str,
    ) -> Result<Option<String>> {
        self.state = UpdateState::Verifying;

        let actual = match digest::digest_file(artifact.path()).await {
            Ok(actual) => actual,
            Err(e) => {
                self.state = UpdateState::Idle;
                return Err(e.into());
            }
        };

        if digest::digests_match(&actual, expected_digest) {
            info!(
                version = %artifact.metadata().version,
                digest = %actual,
                "Firmware verified"
            );
            self.ready = Some(ReadyArtifact {
                path: artifact.path().to_path_buf(),
                metadata: artifact.metadata().clone(),
            });
            self.state = UpdateState::Ready;
            return Ok(None);
        }

        warn!(
            version = %artifact.metadata().version,
            expected = %expected_digest,
            actual = %actual,
            "Digest mismatch, discarding download"
        );
        if let Err(e) = tokio::fs::remove_file(artifact.path()).await {
            warn!(error = %e, "Failed to delete rejected download");
        }
        self.ready = None;
        self.state = UpdateState::Rejected;
        Ok(Some(actual))
    }

    /// Hand over the verified artifact, returning the machine to `Idle`
    pub fn take_ready(&mut self) -> Option<ReadyArtifact> {
        let ready = self.ready.take();
        if ready.is_some() {
            self.state = UpdateState::Idle;
            self.pending = None;
        }
        ready
    }

    /// Return to `Idle` from any terminal state
    pub fn reset(&mut self) {
        self.state = UpdateState::Idle;
        self.pending = None;
        self.ready = None;
    }

    /// Run check, download and verify in sequence
    pub async fn update(&mut self) -> Result<UpdateOutcome> {
        if self.state != UpdateState::Idle {
            self.reset();
        }

        let response = self.check_for_update().await?;
        if !response.update_available {
            return Ok(UpdateOutcome::UpToDate);
        }
        let metadata = self.pending.clone().ok_or_else(|| {
            self.state = UpdateState::Idle;
            ClientError::ParseError("update available without metadata".to_string())
        })?;

        let file = self.download_firmware(&metadata.version).await?;
        match self.verify_inner(file, &metadata.digest).await? {
            None => {
                let ready = self
                    .ready
                    .clone()
                    .ok_or_else(|| ClientError::InvalidState("verified artifact missing".into()))?;
                Ok(UpdateOutcome::Ready(ready))
            }
            Some(actual_digest) => Ok(UpdateOutcome::Rejected {
                version: metadata.version,
                expected_digest: metadata.digest,
                actual_digest,
            }),
        }
    }
}
