//! OTA HTTP client implementation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use ota_core::{ArtifactMetadata, Version};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::*;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default upload/download timeout
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Suffix of in-progress downloads
pub const PART_SUFFIX: &str = ".part";

/// Local file name of a downloaded artifact
pub fn local_filename(metadata: &ArtifactMetadata) -> String {
    format!(
        "{}_{}_{}",
        metadata.device_type, metadata.version, metadata.filename
    )
}

/// OTA REST API client
///
/// Thin typed wrapper over the server routes. Downloads are resumable: bytes
/// go to a `.part` file that is only renamed once the declared size arrived.
#[derive(Debug, Clone)]
pub struct OtaClient {
    client: Client,
    base_url: Url,
    transfer_timeout: Duration,
}

impl OtaClient {
    /// Create a new OTA client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the OTA server (e.g., "http://localhost:8070")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a new OTA client with custom timeouts
    pub fn with_config(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Self::build(base_url, None, timeout, connect_timeout, DEFAULT_TRANSFER_TIMEOUT)
    }

    /// Create a new OTA client that sends a bearer token with every request.
    pub fn with_bearer_token(base_url: &str, token: &str) -> Result<Self> {
        Self::build(
            base_url,
            Some(token),
            DEFAULT_TIMEOUT,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_TRANSFER_TIMEOUT,
        )
    }

    /// Create a client from a [`ClientConfig`]
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::build(
            &config.connection.base_url,
            config.connection.bearer_token.as_deref(),
            Duration::from_millis(config.timeouts.request_ms),
            Duration::from_millis(config.timeouts.connect_ms),
            Duration::from_millis(config.timeouts.transfer_ms),
        )
    }

    fn build(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
        connect_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            let header_value =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ClientError::ParseError(format!("Invalid auth token: {}", e)))?;
            headers.insert(AUTHORIZATION, header_value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()?;

        let base_url = Url::parse(base_url)?;

        Ok(Self {
            client,
            base_url,
            transfer_timeout,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn firmware_url(&self, device_type: &str, version: &Version, suffix: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!(
            "/api/v1/firmware/{}/{}{}",
            device_type, version, suffix
        ))?)
    }

    // =========================================================================
    // Health Check
    // =========================================================================

    /// Check server health
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<String> {
        let url = self.base_url.join("/health")?;
        let response = self.client.get(url).send().await?;

        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            Err(self.extract_error(response).await)
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ask the server whether a newer version exists
    #[instrument(skip(self))]
    pub async fn check_update(
        &self,
        device_type: &str,
        current_version: Option<&Version>,
    ) -> Result<CheckUpdateResponse> {
        let mut url = self.base_url.join("/api/v1/check_update")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("device_type", device_type);
            if let Some(current) = current_version {
                query.append_pair("current_version", current.as_str());
            }
        }
        debug!("Checking for update at {}", url);

        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// List every published artifact, grouped by device type
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<BTreeMap<String, Vec<ArtifactMetadata>>> {
        let url = self.base_url.join("/api/v1/firmware")?;
        let response = self.client.get(url).send().await?;
        self.handle_response::<FirmwareIndex>(response)
            .await
            .map(|index| index.device_types)
    }

    /// List the versions of one device type
    #[instrument(skip(self))]
    pub async fn list_firmware(&self, device_type: &str) -> Result<DeviceFirmware> {
        let url = self
            .base_url
            .join(&format!("/api/v1/firmware/{}", device_type))?;
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// Metadata of the latest version of a device type
    #[instrument(skip(self))]
    pub async fn latest(&self, device_type: &str) -> Result<ArtifactMetadata> {
        let url = self
            .base_url
            .join(&format!("/api/v1/firmware/{}/latest", device_type))?;
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// Metadata of one version
    #[instrument(skip(self))]
    pub async fn get_firmware(
        &self,
        device_type: &str,
        version: &Version,
    ) -> Result<ArtifactMetadata> {
        let url = self.firmware_url(device_type, version, "")?;
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Upload an in-memory artifact
    ///
    /// With `replace` the version must already exist and the server must
    /// allow replacing.
    #[instrument(skip(self, data, notes), fields(size = data.len()))]
    pub async fn upload_bytes(
        &self,
        device_type: &str,
        version: &Version,
        filename: &str,
        data: Bytes,
        notes: Option<&str>,
        replace: bool,
    ) -> Result<ArtifactMetadata> {
        let url = self.upload_url(device_type, version, filename, notes)?;
        let request = if replace {
            self.client.put(url)
        } else {
            self.client.post(url)
        };

        let response = request
            .timeout(self.transfer_timeout)
            .body(data)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Upload a file from disk, streamed
    #[instrument(skip(self, notes))]
    pub async fn upload_file(
        &self,
        device_type: &str,
        version: &Version,
        path: &Path,
        notes: Option<&str>,
        replace: bool,
    ) -> Result<ArtifactMetadata> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ota_core::DEFAULT_FILENAME.to_string());
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let url = self.upload_url(device_type, version, &filename, notes)?;
        let request = if replace {
            self.client.put(url)
        } else {
            self.client.post(url)
        };

        info!(size = len, "Uploading {}", path.display());
        let response = request
            .timeout(self.transfer_timeout)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        self.handle_response(response).await
    }

    fn upload_url(
        &self,
        device_type: &str,
        version: &Version,
        filename: &str,
        notes: Option<&str>,
    ) -> Result<Url> {
        let mut url = self.firmware_url(device_type, version, "")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filename", filename);
            if let Some(notes) = notes {
                query.append_pair("notes", notes);
            }
        }
        Ok(url)
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Download one version into `dir`, fetching its metadata first
    pub async fn download_firmware(
        &self,
        device_type: &str,
        version: &Version,
        dir: &Path,
    ) -> Result<DownloadedFile> {
        let metadata = self.get_firmware(device_type, version).await?;
        self.download_artifact(&metadata, dir).await
    }

    /// Download the artifact described by `metadata` into `dir`
    ///
    /// An existing `.part` file from an earlier attempt is resumed with a
    /// Range request. If the server answers with the full body instead, the
    /// partial file is truncated and the transfer restarts. The returned file
    /// has the full declared size but is not verified yet.
    #[instrument(
        skip(self, metadata),
        fields(device_type = %metadata.device_type, version = %metadata.version)
    )]
    pub async fn download_artifact(
        &self,
        metadata: &ArtifactMetadata,
        dir: &Path,
    ) -> Result<DownloadedFile> {
        tokio::fs::create_dir_all(dir).await?;
        let name = local_filename(metadata);
        let final_path = dir.join(&name);
        let part_path = partial_path(&final_path);
        let expected = metadata.size_bytes;

        let mut restarted = false;
        loop {
            let mut offset = file_len(&part_path).await?;
            if offset > expected {
                warn!(offset, expected, "Partial download larger than artifact, restarting");
                tokio::fs::remove_file(&part_path).await?;
                offset = 0;
            }
            if offset == expected {
                break;
            }
            if offset > 0 {
                info!(offset, expected, "Resuming download");
            }

            match self.fetch_into(metadata, &part_path, offset).await? {
                Fetch::Done => break,
                Fetch::RangeRejected if !restarted => {
                    warn!(offset, "Server rejected resume offset, restarting");
                    tokio::fs::remove_file(&part_path).await?;
                    restarted = true;
                }
                Fetch::RangeRejected => {
                    return Err(ClientError::server_error(
                        StatusCode::RANGE_NOT_SATISFIABLE.as_u16(),
                        "resume offset rejected",
                    ))
                }
            }
        }

        let received = file_len(&part_path).await?;
        if received != expected {
            return Err(ClientError::Incomplete { expected, received });
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        info!(size = received, "Download complete: {}", final_path.display());
        Ok(DownloadedFile::new(final_path, metadata.clone()))
    }

    /// One transfer attempt, appending to `part_path` from `offset`
    ///
    /// Bytes received before a failure stay in the partial file.
    async fn fetch_into(
        &self,
        metadata: &ArtifactMetadata,
        part_path: &Path,
        offset: u64,
    ) -> Result<Fetch> {
        let url = self.firmware_url(&metadata.device_type, &metadata.version, "/download")?;
        let mut request = self.client.get(url).timeout(self.transfer_timeout);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = request.send().await?;

        let mut file = match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(part_path)
                    .await?
            }
            StatusCode::OK => {
                if offset > 0 {
                    debug!("Server sent the full artifact, discarding partial file");
                }
                tokio::fs::File::create(part_path).await?
            }
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Fetch::RangeRejected),
            _ => return Err(self.extract_error(response).await),
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => file.write_all(&chunk).await?,
                Err(e) => {
                    file.flush().await?;
                    return Err(e.into());
                }
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(Fetch::Done)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ClientError::ParseError(e.to_string()))
        } else {
            Err(self.extract_error(response).await)
        }
    }

    /// Extract error from failed response
    async fn extract_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status();

        // Try to parse error response body
        let message = match response.json::<ErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => format!("HTTP {}", status),
        };

        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::CONFLICT => ClientError::Conflict(message),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClientError::Timeout,
            _ => ClientError::server_error(status.as_u16(), message),
        }
    }
}

enum Fetch {
    Done,
    RangeRejected,
}

async fn file_len(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Path of the partial file belonging to a final download path
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OtaClient::new("http://localhost:8070");
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let client = OtaClient::new("not a url");
        assert!(client.is_err());
    }

    #[test]
    fn test_firmware_url() {
        let client = OtaClient::new("http://localhost:8070").unwrap();
        let version = Version::parse("1.2.3").unwrap();
        let url = client.firmware_url("sensor-v1", &version, "/download").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8070/api/v1/firmware/sensor-v1/1.2.3/download"
        );
    }

    #[test]
    fn test_local_names() {
        let metadata = ArtifactMetadata {
            device_type: "sensor-v1".into(),
            version: Version::parse("1.2.3").unwrap(),
            filename: "fw.bin".into(),
            digest: "00".repeat(32),
            size_bytes: 1,
            uploaded_at: chrono::Utc::now(),
            notes: String::new(),
        };
        assert_eq!(local_filename(&metadata), "sensor-v1_1.2.3_fw.bin");
        assert_eq!(
            partial_path(Path::new("/tmp/sensor-v1_1.2.3_fw.bin")),
            PathBuf::from("/tmp/sensor-v1_1.2.3_fw.bin.part")
        );
    }
}
