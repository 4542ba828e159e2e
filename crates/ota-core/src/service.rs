//! Update service: the request-level operations of an OTA server
//!
//! Composes the [`Registry`] and the [`ArtifactStore`]. Upload bytes are
//! streamed, hashed and committed before the registry lock is ever taken;
//! downloads resolve metadata and then stream immutable bytes without holding
//! any lock.
//!
//! A replace swaps the artifact file and the registry entry under the write
//! side of `swap_lock`, while downloads resolve metadata and open the file
//! under the read side. A download therefore always opens the artifact its
//! metadata describes, and the open handle keeps reading after the swap.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::{OtaError, OtaResult};
use crate::models::{ArtifactMetadata, Identity, UpdateCheckResult, UploadRequest};
use crate::registry::Registry;
use crate::session::DownloadSession;
use crate::store::{
    ArtifactKey, ArtifactReader, ArtifactStore, CommittedArtifact, RetiredArtifact, StagedArtifact,
};
use crate::version::{self, Version};

/// Default upload ceiling (100 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Storage and policy settings of an [`UpdateService`]
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage_dir: PathBuf,
    pub registry_path: PathBuf,
    pub max_upload_bytes: u64,
    pub allow_replace: bool,
}

impl ServiceConfig {
    pub fn new(storage_dir: impl Into<PathBuf>, registry_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            registry_path: registry_path.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allow_replace: false,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn with_allow_replace(mut self, allow: bool) -> Self {
        self.allow_replace = allow;
        self
    }
}

/// A resolved download: metadata, byte stream and the session tracking it
#[derive(Debug)]
pub struct Download {
    pub metadata: ArtifactMetadata,
    pub reader: ArtifactReader,
    pub session: DownloadSession,
}

/// Result of comparing the registry with the artifact store
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Registry entries whose artifact is missing or has the wrong size
    pub dangling: Vec<ArtifactMetadata>,
    /// Committed artifacts no registry entry points at
    pub orphans: Vec<ArtifactKey>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.orphans.is_empty()
    }
}

/// Firmware update service
#[derive(Debug)]
pub struct UpdateService {
    registry: Registry,
    store: ArtifactStore,
    max_upload_bytes: u64,
    allow_replace: bool,
    replace_lock: Mutex<()>,
    swap_lock: RwLock<()>,
}

impl UpdateService {
    /// Load the registry, sweep staging leftovers and reconcile the store
    ///
    /// Orphaned artifacts (committed but never published, e.g. after a crash
    /// between commit and publish) are deleted. Dangling registry entries are
    /// logged and kept.
    pub async fn open(config: ServiceConfig) -> OtaResult<Self> {
        let registry = Registry::load(&config.registry_path).await?;
        let store = ArtifactStore::new(&config.storage_dir).await?;
        store.sweep_staging().await?;

        let service = Self {
            registry,
            store,
            max_upload_bytes: config.max_upload_bytes,
            allow_replace: config.allow_replace,
            replace_lock: Mutex::new(()),
            swap_lock: RwLock::new(()),
        };

        let report = service.audit_consistency().await?;
        for orphan in &report.orphans {
            warn!(
                device_type = %orphan.device_type,
                version = %orphan.version,
                "Removing unpublished artifact"
            );
            service.store.remove(orphan).await?;
        }

        info!(
            max_upload_bytes = service.max_upload_bytes,
            allow_replace = service.allow_replace,
            dangling = report.dangling.len(),
            "Update service ready"
        );
        Ok(service)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Decide whether a device running `current` should update
    ///
    /// A device without a current version is always offered the latest; a
    /// device at or ahead of the latest never is.
    pub fn check_update(&self, device_type: &str, current: Option<&Version>) -> UpdateCheckResult {
        let Some(latest) = self.registry.latest(device_type) else {
            return UpdateCheckResult::none();
        };
        let update_available = match current {
            None => true,
            Some(current) => version::compare(&latest.version, current).is_gt(),
        };
        UpdateCheckResult {
            update_available,
            latest_version: Some(latest.version.clone()),
            metadata: Some(latest),
        }
    }

    /// Versions of one device type, ascending
    pub fn list_firmware(&self, device_type: &str) -> OtaResult<Vec<ArtifactMetadata>> {
        let versions = self.registry.list(device_type);
        if versions.is_empty() {
            return Err(OtaError::NotFound(format!("device type {}", device_type)));
        }
        Ok(versions)
    }

    /// The whole registry, grouped by device type
    pub fn list_all(&self) -> BTreeMap<String, Vec<ArtifactMetadata>> {
        self.registry.list_all()
    }

    pub fn latest(&self, device_type: &str) -> OtaResult<ArtifactMetadata> {
        self.registry
            .latest(device_type)
            .ok_or(OtaError::EmptyVersionSet)
    }

    pub fn get(&self, device_type: &str, version: &Version) -> OtaResult<ArtifactMetadata> {
        self.registry
            .get(device_type, version)
            .ok_or_else(|| OtaError::firmware_not_found(device_type, version.as_str()))
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Stream a new firmware version into the store and publish it
    ///
    /// `declared_len` (e.g. a Content-Length) above the upload ceiling is
    /// rejected before anything is staged. On any failure the staged bytes
    /// are discarded and the registry is untouched.
    pub async fn upload_firmware<S>(
        &self,
        request: UploadRequest,
        declared_len: Option<u64>,
        body: S,
        identity: &Identity,
    ) -> OtaResult<ArtifactMetadata>
    where
        S: Stream<Item = OtaResult<Bytes>> + Send,
    {
        if self.registry.contains(&request.device_type, &request.version) {
            return Err(OtaError::VersionAlreadyExists {
                device_type: request.device_type,
                version: request.version.to_string(),
            });
        }

        let staged = self.receive(&request, declared_len, body).await?;
        let committed = self.store.commit(staged).await?;
        let metadata = metadata_for(&request, &committed);

        if let Err(e) = self.registry.publish(metadata.clone(), &committed).await {
            warn!(
                device_type = %request.device_type,
                version = %request.version,
                error = %e,
                "Publish failed, removing committed artifact"
            );
            if let Err(cleanup) = self.store.remove(committed.key()).await {
                warn!(error = %cleanup, "Failed to remove unpublished artifact");
            }
            return Err(e);
        }

        info!(
            target: "audit",
            event = "publish",
            device_type = %metadata.device_type,
            version = %metadata.version,
            digest = %metadata.digest,
            size = metadata.size_bytes,
            identity = %identity,
            "Firmware published"
        );
        Ok(metadata)
    }

    /// Replace the artifact of an already published version
    ///
    /// Only allowed when the service is configured for it. The previous
    /// artifact is deleted after the new registry state is persisted; any
    /// earlier failure puts it back. Downloads of the version keep resolving
    /// to a readable artifact throughout.
    pub async fn replace_firmware<S>(
        &self,
        request: UploadRequest,
        declared_len: Option<u64>,
        body: S,
        identity: &Identity,
    ) -> OtaResult<ArtifactMetadata>
    where
        S: Stream<Item = OtaResult<Bytes>> + Send,
    {
        if !self.allow_replace {
            return Err(OtaError::ReplaceNotAllowed);
        }
        let _guard = self.replace_lock.lock().await;

        let previous = self.get(&request.device_type, &request.version)?;
        let staged = self.receive(&request, declared_len, body).await?;

        let previous_key = ArtifactKey::new(
            &previous.device_type,
            &previous.version,
            &previous.filename,
        );

        let swap = self.swap_lock.write().await;
        let retired = match self.store.retire(&previous_key).await {
            Ok(retired) => retired,
            Err(e) => {
                self.store.abort(staged).await;
                return Err(e);
            }
        };

        let committed = match self.store.commit(staged).await {
            Ok(committed) => committed,
            Err(e) => {
                warn!(version = %request.version, error = %e, "Replace commit failed");
                self.restore_previous(retired).await;
                return Err(e);
            }
        };

        let metadata = metadata_for(&request, &committed);
        if let Err(e) = self.registry.replace(metadata.clone(), &committed).await {
            warn!(version = %request.version, error = %e, "Replace persist failed");
            if let Err(cleanup) = self.store.remove(committed.key()).await {
                error!(error = %cleanup, "Failed to remove replacement artifact");
            }
            self.restore_previous(retired).await;
            return Err(e);
        }
        drop(swap);
        self.store.discard_retired(retired).await;

        info!(
            target: "audit",
            event = "replace",
            device_type = %metadata.device_type,
            version = %metadata.version,
            digest = %metadata.digest,
            previous_digest = %previous.digest,
            size = metadata.size_bytes,
            identity = %identity,
            "Firmware replaced"
        );
        Ok(metadata)
    }

    /// Put a retired artifact back after a failed replace
    ///
    /// The caller's error is what gets returned; a failure here only leaves
    /// the registry entry dangling and is logged.
    async fn restore_previous(&self, retired: RetiredArtifact) {
        if let Err(e) = self.store.restore(retired).await {
            error!(error = %e, "Failed to restore replaced artifact");
        }
    }

    /// Stream an upload body into staging, enforcing the size ceiling
    async fn receive<S>(
        &self,
        request: &UploadRequest,
        declared_len: Option<u64>,
        body: S,
    ) -> OtaResult<StagedArtifact>
    where
        S: Stream<Item = OtaResult<Bytes>> + Send,
    {
        let limit = self.max_upload_bytes;
        if declared_len.is_some_and(|len| len > limit) {
            return Err(OtaError::PayloadTooLarge { limit });
        }

        let mut staged = self
            .store
            .begin_publish(&request.device_type, &request.version, &request.filename)
            .await?;

        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let result = match chunk {
                Ok(chunk) if staged.bytes_written() + chunk.len() as u64 > limit => {
                    Err(OtaError::PayloadTooLarge { limit })
                }
                Ok(chunk) => staged.append(&chunk).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(
                    device_type = %request.device_type,
                    version = %request.version,
                    received = staged.bytes_written(),
                    error = %e,
                    "Upload failed"
                );
                self.store.abort(staged).await;
                return Err(e);
            }
        }

        if staged.bytes_written() == 0 {
            self.store.abort(staged).await;
            return Err(OtaError::InvalidRequest("firmware payload is empty".into()));
        }
        Ok(staged)
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Resolve a version and open its artifact at `offset`
    pub async fn download_firmware(
        &self,
        device_type: &str,
        version: &Version,
        offset: u64,
        identity: Identity,
    ) -> OtaResult<Download> {
        let (metadata, reader) = {
            let _swap = self.swap_lock.read().await;
            let metadata = self.get(device_type, version)?;
            let reader = self
                .store
                .open(device_type, version, &metadata.filename, offset)
                .await?;
            (metadata, reader)
        };
        let session = DownloadSession::new(
            device_type,
            version,
            &metadata.digest,
            identity,
            offset,
            reader.size(),
        );
        Ok(Download {
            metadata,
            reader,
            session,
        })
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    /// Compare registry entries with the artifacts on disk
    pub async fn audit_consistency(&self) -> OtaResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let mut referenced = Vec::new();

        for metadata in self.registry.list_all().into_values().flatten() {
            let key =
                ArtifactKey::new(&metadata.device_type, &metadata.version, &metadata.filename);
            match self.store.size_of(&key).await? {
                Some(size) if size == metadata.size_bytes => {}
                found => {
                    warn!(
                        device_type = %metadata.device_type,
                        version = %metadata.version,
                        expected_size = metadata.size_bytes,
                        found_size = ?found,
                        "Registry entry has no matching artifact"
                    );
                    report.dangling.push(metadata);
                }
            }
            referenced.push(key);
        }

        report.orphans = self
            .store
            .list_committed()
            .await?
            .into_iter()
            .filter(|key| !referenced.contains(key))
            .collect();
        Ok(report)
    }
}

fn metadata_for(request: &UploadRequest, committed: &CommittedArtifact) -> ArtifactMetadata {
    ArtifactMetadata {
        device_type: request.device_type.clone(),
        version: request.version.clone(),
        filename: request.filename.clone(),
        digest: committed.digest().to_string(),
        size_bytes: committed.size_bytes(),
        uploaded_at: Utc::now(),
        notes: request.notes.clone(),
    }
}
