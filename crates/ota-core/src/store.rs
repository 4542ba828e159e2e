//! Filesystem artifact store with atomic publish
//!
//! Layout:
//!
//! ```text
//! <root>/<device_type>/<version>/<filename>   committed, immutable artifacts
//! <root>/.staging/<uuid>.part                 in-flight uploads
//! <root>/.staging/<uuid>.retired              artifacts set aside during a replace
//! ```
//!
//! Bytes are appended to a staging file and hashed on the way through. A
//! commit fsyncs the staging file and hard-links it into its final name, which
//! fails if the name is taken, so a final name only ever points at a complete
//! file and committed artifacts are never overwritten. A [`StagedArtifact`]
//! dropped without commit removes its staging file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::digest::DigestBuilder;
use crate::error::{OtaError, OtaResult};
use crate::version::Version;

const STAGING_DIR: &str = ".staging";
const PART_SUFFIX: &str = "part";
const RETIRED_SUFFIX: &str = "retired";

/// Storage key of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub device_type: String,
    pub version: Version,
    pub filename: String,
}

impl ArtifactKey {
    pub fn new(device_type: &str, version: &Version, filename: &str) -> Self {
        Self {
            device_type: device_type.to_string(),
            version: version.clone(),
            filename: filename.to_string(),
        }
    }
}

/// Filesystem-backed artifact store
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create (or reuse) a store rooted at `root`
    pub async fn new(root: impl Into<PathBuf>) -> OtaResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn final_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(&key.device_type)
            .join(key.version.as_str())
            .join(&key.filename)
    }

    fn staging_path(&self, id: Uuid, suffix: &str) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{}.{}", id, suffix))
    }

    /// Allocate a staging file for a new artifact
    pub async fn begin_publish(
        &self,
        device_type: &str,
        version: &Version,
        filename: &str,
    ) -> OtaResult<StagedArtifact> {
        let key = ArtifactKey::new(device_type, version, filename);
        let id = Uuid::new_v4();
        let staging_path = self.staging_path(id, PART_SUFFIX);
        let file = File::create(&staging_path).await?;

        debug!(
            staging_id = %id,
            device_type = %key.device_type,
            version = %key.version,
            "Staging upload"
        );

        Ok(StagedArtifact {
            id,
            key,
            staging_path,
            file: Some(file),
            digest: DigestBuilder::new(),
        })
    }

    /// Move a fully written staged artifact to its final, readable name
    ///
    /// Fails with [`OtaError::VersionAlreadyExists`] if an artifact is already
    /// committed under that name; the staged bytes are discarded in that case.
    pub async fn commit(&self, mut staged: StagedArtifact) -> OtaResult<CommittedArtifact> {
        let result = self.commit_inner(&mut staged).await;
        if result.is_err() {
            staged.discard().await;
        }
        result
    }

    async fn commit_inner(&self, staged: &mut StagedArtifact) -> OtaResult<CommittedArtifact> {
        let mut file = staged
            .file
            .take()
            .ok_or_else(|| OtaError::InvalidRequest("staged artifact already finished".into()))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let final_path = self.final_path(&staged.key);
        let parent = final_path
            .parent()
            .ok_or_else(|| OtaError::InvalidRequest("artifact has no parent directory".into()))?;
        fs::create_dir_all(parent).await?;

        // hard_link refuses to clobber an existing name
        match fs::hard_link(&staged.staging_path, &final_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(OtaError::VersionAlreadyExists {
                    device_type: staged.key.device_type.clone(),
                    version: staged.key.version.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        fsync_dir(parent).await;

        if let Err(e) = fs::remove_file(&staged.staging_path).await {
            warn!(staging_id = %staged.id, error = %e, "Failed to remove staging link");
        }

        let digest = std::mem::take(&mut staged.digest);
        let committed = CommittedArtifact {
            key: staged.key.clone(),
            size_bytes: digest.len(),
            digest: digest.finalize(),
        };

        info!(
            device_type = %committed.key.device_type,
            version = %committed.key.version,
            size = committed.size_bytes,
            digest = %committed.digest,
            "Artifact committed"
        );

        Ok(committed)
    }

    /// Discard a staged write
    pub async fn abort(&self, mut staged: StagedArtifact) {
        debug!(staging_id = %staged.id, written = staged.bytes_written(), "Aborting staged upload");
        staged.discard().await;
    }

    /// Remove a committed artifact (used to undo a publish that was not acknowledged)
    pub async fn remove(&self, key: &ArtifactKey) -> OtaResult<()> {
        let path = self.final_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_dirs(&path).await;
        Ok(())
    }

    /// Set a committed artifact aside so its name can be reused
    ///
    /// The returned handle must be either restored or discarded.
    pub async fn retire(&self, key: &ArtifactKey) -> OtaResult<RetiredArtifact> {
        let final_path = self.final_path(key);
        let retired_path = self.staging_path(Uuid::new_v4(), RETIRED_SUFFIX);
        fs::rename(&final_path, &retired_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OtaError::NotFound(format!(
                    "artifact {} {}",
                    key.device_type, key.version
                )),
                _ => e.into(),
            })?;
        Ok(RetiredArtifact {
            key: key.clone(),
            retired_path,
        })
    }

    /// Put a retired artifact back under its original name
    pub async fn restore(&self, retired: RetiredArtifact) -> OtaResult<()> {
        let final_path = self.final_path(&retired.key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&retired.retired_path, &final_path).await?;
        Ok(())
    }

    /// Permanently delete a retired artifact
    pub async fn discard_retired(&self, retired: RetiredArtifact) {
        if let Err(e) = fs::remove_file(&retired.retired_path).await {
            warn!(
                device_type = %retired.key.device_type,
                version = %retired.key.version,
                error = %e,
                "Failed to delete retired artifact"
            );
        }
        self.prune_empty_dirs(&self.final_path(&retired.key)).await;
    }

    /// Open a committed artifact for streaming, starting at `offset`
    pub async fn open(
        &self,
        device_type: &str,
        version: &Version,
        filename: &str,
        offset: u64,
    ) -> OtaResult<ArtifactReader> {
        let key = ArtifactKey::new(device_type, version, filename);
        let mut file = File::open(self.final_path(&key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OtaError::firmware_not_found(device_type, version.as_str())
            } else {
                e.into()
            }
        })?;
        let size = file.metadata().await?.len();
        if offset > size {
            return Err(OtaError::RangeNotSatisfiable { offset, size });
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(ArtifactReader {
            file,
            size,
            offset,
        })
    }

    /// Size of a committed artifact, `None` if it does not exist
    pub async fn size_of(&self, key: &ArtifactKey) -> OtaResult<Option<u64>> {
        match fs::metadata(self.final_path(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All committed artifacts currently on disk
    pub async fn list_committed(&self) -> OtaResult<Vec<ArtifactKey>> {
        let mut keys = Vec::new();
        let mut devices = fs::read_dir(&self.root).await?;
        while let Some(device) = devices.next_entry().await? {
            let device_type = device.file_name().to_string_lossy().into_owned();
            if device_type == STAGING_DIR || !device.file_type().await?.is_dir() {
                continue;
            }
            let mut versions = fs::read_dir(device.path()).await?;
            while let Some(version_dir) = versions.next_entry().await? {
                if !version_dir.file_type().await?.is_dir() {
                    continue;
                }
                let Ok(version) = Version::parse(&version_dir.file_name().to_string_lossy()) else {
                    warn!(device_type = %device_type, "Skipping unparseable version directory");
                    continue;
                };
                let mut files = fs::read_dir(version_dir.path()).await?;
                while let Some(file) = files.next_entry().await? {
                    if file.file_type().await?.is_file() {
                        keys.push(ArtifactKey {
                            device_type: device_type.clone(),
                            version: version.clone(),
                            filename: file.file_name().to_string_lossy().into_owned(),
                        });
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Delete staging leftovers of a previous process
    pub async fn sweep_staging(&self) -> OtaResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(self.root.join(STAGING_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, "Failed to remove staging leftover"),
            }
        }
        if removed > 0 {
            info!(removed, "Swept staging leftovers");
        }
        Ok(removed)
    }

    /// Remove the version and device directories above `path` once empty
    async fn prune_empty_dirs(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || fs::remove_dir(d).await.is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

/// Write handle for an artifact being uploaded
///
/// Dropping the handle without [`ArtifactStore::commit`] removes the staging
/// file, so an upload cancelled mid-stream leaves nothing behind.
#[derive(Debug)]
pub struct StagedArtifact {
    id: Uuid,
    key: ArtifactKey,
    staging_path: PathBuf,
    file: Option<File>,
    digest: DigestBuilder,
}

impl StagedArtifact {
    /// Append a chunk to the staging file and feed it to the digest
    pub async fn append(&mut self, chunk: &[u8]) -> OtaResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| OtaError::InvalidRequest("staged artifact already finished".into()))?;
        file.write_all(chunk).await?;
        self.digest.update(chunk);
        Ok(())
    }

    /// Bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.digest.len()
    }

    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    async fn discard(&mut self) {
        self.file.take();
        match fs::remove_file(&self.staging_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(staging_id = %self.id, error = %e, "Failed to remove staging file"),
        }
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

/// Proof that an artifact is fully written under its final name
///
/// Only [`ArtifactStore::commit`] creates these; the registry requires one to
/// publish metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedArtifact {
    key: ArtifactKey,
    size_bytes: u64,
    digest: String,
}

impl CommittedArtifact {
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[cfg(test)]
    pub(crate) fn for_tests(key: ArtifactKey, size_bytes: u64, digest: String) -> Self {
        Self {
            key,
            size_bytes,
            digest,
        }
    }
}

/// A committed artifact moved aside during a replace
#[derive(Debug)]
pub struct RetiredArtifact {
    key: ArtifactKey,
    retired_path: PathBuf,
}

/// Streaming read handle over a committed artifact
#[derive(Debug)]
pub struct ArtifactReader {
    file: File,
    size: u64,
    offset: u64,
}

impl ArtifactReader {
    /// Total artifact size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset the read started at
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes left to stream from `offset`
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}

impl AsyncRead for ArtifactReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

async fn fsync_dir(dir: &Path) {
    if let Ok(f) = File::open(dir).await {
        let _ = f.sync_all().await;
    }
}
