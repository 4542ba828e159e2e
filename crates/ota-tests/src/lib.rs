//! End-to-end tests for the OTA server and client
//!
//! Every test starts its own server on an ephemeral port with storage and
//! registry in a fresh temp directory, so tests run in parallel.
//!
//! ```bash
//! cargo test -p ota-tests
//! ```
//!
//! # Test Structure
//!
//! - `e2e_test.rs` - update scenarios, persistence, resume, limits
//! - `concurrency_test.rs` - uploads racing downloads and each other

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use ota_api::{create_router, AppState, AuthToken};
use ota_client::testing::TestServer;
use ota_client::{ArtifactMetadata, OtaClient, Version};
use ota_core::{ServiceConfig, UpdateService};
use tempfile::TempDir;

/// Options for configuring the test harness
#[derive(Clone, Default)]
pub struct HarnessOptions {
    pub allow_replace: bool,
    pub max_upload_bytes: Option<u64>,
    pub auth_token: Option<String>,
}

/// A running server plus its on-disk state
pub struct TestHarness {
    dir: TempDir,
    options: HarnessOptions,
    server: Option<TestServer>,
    /// Plain HTTP client for wire-level assertions
    pub http: reqwest::Client,
}

impl TestHarness {
    pub async fn start() -> Self {
        Self::start_with(HarnessOptions::default()).await
    }

    pub async fn start_with(options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let server = spawn(dir.path(), &options).await;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("http client");
        Self {
            dir,
            options,
            server: Some(server),
            http,
        }
    }

    /// Stop the server and start a new one over the same storage
    pub async fn restart(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
        self.server = Some(spawn(self.dir.path(), &self.options).await);
    }

    fn server(&self) -> &TestServer {
        self.server.as_ref().expect("server running")
    }

    /// Client of the running server (carries the token, if any)
    pub fn client(&self) -> OtaClient {
        match &self.options.auth_token {
            Some(token) => OtaClient::with_bearer_token(&self.base_url(), token).expect("client"),
            None => self.server().client.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        self.server().base_url()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.dir.path().join("firmware")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.path().join("firmware_db.json")
    }

    /// On-disk location of a published artifact
    pub fn artifact_path(&self, device_type: &str, version: &str, filename: &str) -> PathBuf {
        self.storage_dir()
            .join(device_type)
            .join(version)
            .join(filename)
    }

    /// Number of files in the staging area
    pub fn staging_count(&self) -> usize {
        std::fs::read_dir(self.storage_dir().join(".staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// A fresh directory for client downloads
    pub fn download_dir(&self, name: &str) -> PathBuf {
        let dir = self.dir.path().join("devices").join(name);
        std::fs::create_dir_all(&dir).expect("download dir");
        dir
    }

    /// Publish `data` as `fw.bin`
    pub async fn publish(&self, device_type: &str, version: &str, data: &[u8]) -> ArtifactMetadata {
        self.client()
            .upload_bytes(
                device_type,
                &version_of(version),
                "fw.bin",
                Bytes::copy_from_slice(data),
                None,
                false,
            )
            .await
            .expect("publish")
    }
}

async fn spawn(root: &Path, options: &HarnessOptions) -> TestServer {
    let mut config = ServiceConfig::new(root.join("firmware"), root.join("firmware_db.json"))
        .with_allow_replace(options.allow_replace);
    if let Some(limit) = options.max_upload_bytes {
        config = config.with_max_upload_bytes(limit);
    }
    let service = UpdateService::open(config).await.expect("open service");

    let mut state = AppState::new(service);
    if let Some(token) = &options.auth_token {
        state = state.with_auth(AuthToken::new(token.clone(), "test-operator"));
    }
    TestServer::start(create_router(state))
        .await
        .expect("start server")
}

pub fn version_of(s: &str) -> Version {
    Version::parse(s).expect("valid version")
}

/// Deterministic pseudo-random content
pub fn firmware_image(len: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed).wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
