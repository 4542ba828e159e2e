//! Versioned firmware registry
//!
//! Maps device type → version → [`ArtifactMetadata`]. Entries are keyed by the
//! exact version string; [`version::compare`] only orders listings and picks
//! the latest, it never decides identity. The index is kept as a
//! copy-on-write snapshot: readers clone an `Arc` of the current index and
//! never wait on writers, writers are serialized by a mutex, build the next
//! index off to the side, persist it durably and only then swap it in. A
//! failed persist therefore leaves both memory and disk at the previous state.
//!
//! The persisted document looks like:
//!
//! ```json
//! {
//!   "devices": {
//!     "sensor-v1": {
//!       "1.2.3": { "device_type": "sensor-v1", "version": "1.2.3", ... }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{OtaError, OtaResult};
use crate::models::ArtifactMetadata;
use crate::store::CommittedArtifact;
use crate::version::{self, Version};

type Index = BTreeMap<String, BTreeMap<String, ArtifactMetadata>>;

/// On-disk registry document
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryDocument {
    devices: BTreeMap<String, BTreeMap<String, ArtifactMetadata>>,
}

/// Concurrency-safe, durably persisted firmware index
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    index: RwLock<Arc<Index>>,
    writer: Mutex<()>,
}

impl Registry {
    /// Load the registry from `path`
    ///
    /// A missing file yields an empty registry. A document that does not
    /// validate is rejected with [`OtaError::CorruptRegistry`].
    pub async fn load(path: impl Into<PathBuf>) -> OtaResult<Self> {
        let path = path.into();
        let index = match tokio::fs::read(&path).await {
            Ok(raw) => parse_document(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No registry document yet, starting empty");
                Index::new()
            }
            Err(e) => return Err(e.into()),
        };

        let entries: usize = index.values().map(BTreeMap::len).sum();
        info!(device_types = index.len(), entries, "Registry loaded");

        Ok(Self {
            path,
            index: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Metadata of the greatest version published for `device_type`
    pub fn latest(&self, device_type: &str) -> Option<ArtifactMetadata> {
        let index = self.snapshot();
        let versions = index.get(device_type)?;
        let latest = version::max(versions.values().map(|m| &m.version)).ok()?;
        versions.get(latest.as_str()).cloned()
    }

    /// Metadata of one version
    pub fn get(&self, device_type: &str, version: &Version) -> Option<ArtifactMetadata> {
        self.snapshot()
            .get(device_type)
            .and_then(|versions| versions.get(version.as_str()))
            .cloned()
    }

    /// All versions of a device type in ascending version order
    pub fn list(&self, device_type: &str) -> Vec<ArtifactMetadata> {
        self.snapshot()
            .get(device_type)
            .map(sorted)
            .unwrap_or_default()
    }

    /// Every entry, grouped by device type
    pub fn list_all(&self) -> BTreeMap<String, Vec<ArtifactMetadata>> {
        self.snapshot()
            .iter()
            .map(|(device, versions)| (device.clone(), sorted(versions)))
            .collect()
    }

    /// Known device types
    pub fn device_types(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn contains(&self, device_type: &str, version: &Version) -> bool {
        self.snapshot()
            .get(device_type)
            .is_some_and(|versions| versions.contains_key(version.as_str()))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Make a committed artifact visible
    ///
    /// Rejects a version that already exists for the device type with
    /// [`OtaError::VersionAlreadyExists`]; the registry is left unchanged.
    pub async fn publish(
        &self,
        metadata: ArtifactMetadata,
        artifact: &CommittedArtifact,
    ) -> OtaResult<()> {
        check_artifact(&metadata, artifact)?;

        let _guard = self.writer.lock().await;
        let current = self.snapshot();
        if current
            .get(&metadata.device_type)
            .is_some_and(|versions| versions.contains_key(metadata.version.as_str()))
        {
            return Err(OtaError::VersionAlreadyExists {
                device_type: metadata.device_type,
                version: metadata.version.to_string(),
            });
        }

        let mut next = (*current).clone();
        next.entry(metadata.device_type.clone())
            .or_default()
            .insert(metadata.version.to_string(), metadata.clone());

        self.commit(next).await?;
        debug!(
            device_type = %metadata.device_type,
            version = %metadata.version,
            "Registry entry published"
        );
        Ok(())
    }

    /// Swap the metadata of an existing version
    ///
    /// Returns the metadata that was replaced, or [`OtaError::NotFound`] if the
    /// version is not published.
    pub async fn replace(
        &self,
        metadata: ArtifactMetadata,
        artifact: &CommittedArtifact,
    ) -> OtaResult<ArtifactMetadata> {
        check_artifact(&metadata, artifact)?;

        let _guard = self.writer.lock().await;
        let current = self.snapshot();
        let previous = current
            .get(&metadata.device_type)
            .and_then(|versions| versions.get(metadata.version.as_str()))
            .cloned()
            .ok_or_else(|| {
                OtaError::firmware_not_found(&metadata.device_type, metadata.version.as_str())
            })?;

        let mut next = (*current).clone();
        next.entry(metadata.device_type.clone())
            .or_default()
            .insert(metadata.version.to_string(), metadata);

        self.commit(next).await?;
        Ok(previous)
    }

    /// Persist `next` and make it the visible index
    async fn commit(&self, next: Index) -> OtaResult<()> {
        persist(&self.path, &next).await?;
        *self.index.write() = Arc::new(next);
        Ok(())
    }
}

fn check_artifact(metadata: &ArtifactMetadata, artifact: &CommittedArtifact) -> OtaResult<()> {
    let key = artifact.key();
    let consistent = key.device_type == metadata.device_type
        && key.version == metadata.version
        && key.filename == metadata.filename
        && artifact.size_bytes() == metadata.size_bytes
        && artifact.digest() == metadata.digest;
    if !consistent {
        return Err(OtaError::InvalidRequest(
            "metadata does not describe the committed artifact".into(),
        ));
    }
    Ok(())
}

/// Entries of one device type in ascending version order
fn sorted(versions: &BTreeMap<String, ArtifactMetadata>) -> Vec<ArtifactMetadata> {
    let mut entries: Vec<ArtifactMetadata> = versions.values().cloned().collect();
    entries.sort_by(|a, b| version::compare(&a.version, &b.version));
    entries
}

fn parse_document(raw: &[u8]) -> OtaResult<Index> {
    let doc: RegistryDocument =
        serde_json::from_slice(raw).map_err(|e| OtaError::CorruptRegistry(e.to_string()))?;

    let mut index = Index::new();
    for (device_type, versions) in doc.devices {
        let entries = index.entry(device_type.clone()).or_default();
        for (key, metadata) in versions {
            if metadata.device_type != device_type || metadata.version.as_str() != key {
                return Err(OtaError::CorruptRegistry(format!(
                    "entry {}/{} does not match its metadata",
                    device_type, key
                )));
            }
            metadata
                .validate()
                .map_err(|e| OtaError::CorruptRegistry(e.to_string()))?;
            entries.insert(key, metadata);
        }
    }
    Ok(index)
}

/// Write the index durably: temp file, fsync, rename, fsync directory
async fn persist(path: &Path, index: &Index) -> OtaResult<()> {
    let doc = RegistryDocument {
        devices: index.clone(),
    };
    let raw = serde_json::to_vec_pretty(&doc)
        .map_err(|e| OtaError::Io(std::io::Error::other(e)))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = dir.join(tmp_name);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&raw).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Ok(d) = tokio::fs::File::open(&dir).await {
        let _ = d.sync_all().await;
    }
    Ok(())
}
