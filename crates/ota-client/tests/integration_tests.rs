//! Integration tests for ota-client
//!
//! These tests spin up a real OTA server and drive it through the client, so
//! the client stays in sync with the API.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use ota_api::{create_router, AppState, AuthToken};
use ota_client::testing::TestServer;
use ota_client::{
    local_filename, partial_path, ClientError, OtaClient, UpdateClient, UpdateOutcome,
    UpdateState, Version,
};
use ota_core::{digest, ServiceConfig, UpdateService};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    server: TestServer,
    storage: PathBuf,
    _dir: TempDir,
}

async fn start_server(allow_replace: bool, auth: Option<AuthToken>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("firmware");
    let config = ServiceConfig::new(&storage, dir.path().join("firmware_db.json"))
        .with_allow_replace(allow_replace);
    let service = UpdateService::open(config).await.unwrap();

    let mut state = AppState::new(service);
    if let Some(token) = auth {
        state = state.with_auth(token);
    }
    let server = TestServer::start(create_router(state)).await.unwrap();
    Fixture {
        server,
        storage,
        _dir: dir,
    }
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn payload(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

async fn publish(client: &OtaClient, device: &str, version: &str, data: Bytes) {
    client
        .upload_bytes(device, &v(version), "fw.bin", data, None, false)
        .await
        .unwrap();
}

fn updater(server: &TestServer, current: Option<&str>, dir: &Path) -> UpdateClient {
    UpdateClient::new(
        server.client.clone(),
        "sensor-v1",
        current.map(v),
        dir,
    )
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fx = start_server(false, None).await;
    assert_eq!(fx.server.client.health().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_upload_and_query() {
    let fx = start_server(false, None).await;
    let client = &fx.server.client;
    let data = payload(4096, 1);

    let meta = client
        .upload_bytes("sensor-v1", &v("1.0.0"), "fw.bin", data.clone(), Some("first"), false)
        .await
        .unwrap();
    assert_eq!(meta.size_bytes, 4096);
    assert_eq!(meta.digest, digest::digest_bytes(&data));
    assert_eq!(meta.notes, "first");

    publish(client, "sensor-v1", "1.10.0", payload(10, 2)).await;
    publish(client, "sensor-v1", "1.9.0", payload(10, 3)).await;

    let latest = client.latest("sensor-v1").await.unwrap();
    assert_eq!(latest.version, v("1.10.0"));

    let listing = client.list_firmware("sensor-v1").await.unwrap();
    let versions: Vec<_> = listing.versions.iter().map(|m| m.version.to_string()).collect();
    assert_eq!(versions, vec!["1.0.0", "1.9.0", "1.10.0"]);

    let all = client.list_all().await.unwrap();
    assert_eq!(all["sensor-v1"].len(), 3);

    let fetched = client.get_firmware("sensor-v1", &v("1.0.0")).await.unwrap();
    assert_eq!(fetched, meta);
}

#[tokio::test]
async fn test_check_update() {
    let fx = start_server(false, None).await;
    let client = &fx.server.client;

    let none = client.check_update("sensor-v1", None).await.unwrap();
    assert!(!none.update_available);
    assert!(none.latest_version.is_none());

    publish(client, "sensor-v1", "2.0", payload(64, 4)).await;

    let fresh = client.check_update("sensor-v1", None).await.unwrap();
    assert!(fresh.update_available);
    assert_eq!(fresh.latest_version, Some(v("2.0")));
    assert!(fresh.metadata.is_some());

    let current = client.check_update("sensor-v1", Some(&v("2.0"))).await.unwrap();
    assert!(!current.update_available);
    assert_eq!(current.latest_version, Some(v("2.0")));

    let newer = client.check_update("sensor-v1", Some(&v("3.0"))).await.unwrap();
    assert!(!newer.update_available);
}

#[tokio::test]
async fn test_errors_map_to_variants() {
    let fx = start_server(false, None).await;
    let client = &fx.server.client;

    let err = client.get_firmware("sensor-v1", &v("9.9")).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    publish(client, "sensor-v1", "1.0", payload(8, 5)).await;
    let err = client
        .upload_bytes("sensor-v1", &v("1.0"), "fw.bin", payload(8, 6), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Conflict(_)));

    let err = client
        .upload_bytes("sensor-v1", &v("1.0"), "fw.bin", payload(8, 6), None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ServerError { status: 403, .. }));
}

#[tokio::test]
async fn test_bearer_token() {
    let fx = start_server(false, Some(AuthToken::new("s3cret", "ci"))).await;

    let err = fx.server.client.list_all().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)));

    let authed = OtaClient::with_bearer_token(&fx.server.base_url(), "s3cret").unwrap();
    publish(&authed, "sensor-v1", "1.0", payload(8, 7)).await;
    assert_eq!(authed.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_file_streams_from_disk() {
    let fx = start_server(false, None).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bin");
    let data = payload(200_000, 8);
    tokio::fs::write(&path, &data).await.unwrap();

    let meta = fx
        .server
        .client
        .upload_file("sensor-v1", &v("1.0"), &path, None, false)
        .await
        .unwrap();
    assert_eq!(meta.filename, "image.bin");
    assert_eq!(meta.size_bytes, 200_000);
    assert_eq!(meta.digest, digest::digest_bytes(&data));
}

// =============================================================================
// Downloads
// =============================================================================

#[tokio::test]
async fn test_download_and_verify() {
    let fx = start_server(false, None).await;
    let data = payload(150_000, 9);
    publish(&fx.server.client, "sensor-v1", "1.0", data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let file = fx
        .server
        .client
        .download_firmware("sensor-v1", &v("1.0"), dir.path())
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(file.path()).await.unwrap(), data.to_vec());
    assert!(!partial_path(file.path()).exists());
    assert!(digest::verify_file(file.path(), &file.metadata().digest).await.unwrap());
}

#[tokio::test]
async fn test_download_resumes_partial_file() {
    let fx = start_server(false, None).await;
    let data = payload(100_000, 10);
    publish(&fx.server.client, "sensor-v1", "1.0", data.clone()).await;
    let meta = fx.server.client.get_firmware("sensor-v1", &v("1.0")).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let part = partial_path(&dir.path().join(local_filename(&meta)));
    tokio::fs::write(&part, &data[..40_000]).await.unwrap();

    let file = fx
        .server
        .client
        .download_artifact(&meta, dir.path())
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(file.path()).await.unwrap(), data.to_vec());
    assert!(!part.exists());
}

#[tokio::test]
async fn test_oversized_partial_file_restarts() {
    let fx = start_server(false, None).await;
    let data = payload(1_000, 11);
    publish(&fx.server.client, "sensor-v1", "1.0", data.clone()).await;
    let meta = fx.server.client.get_firmware("sensor-v1", &v("1.0")).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let part = partial_path(&dir.path().join(local_filename(&meta)));
    tokio::fs::write(&part, vec![0u8; 5_000]).await.unwrap();

    let file = fx
        .server
        .client
        .download_artifact(&meta, dir.path())
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(file.path()).await.unwrap(), data.to_vec());
}

// =============================================================================
// Update state machine
// =============================================================================

#[tokio::test]
async fn test_update_up_to_date() {
    let fx = start_server(false, None).await;
    publish(&fx.server.client, "sensor-v1", "1.0", payload(32, 12)).await;

    let dir = tempfile::tempdir().unwrap();
    let mut updater = updater(&fx.server, Some("1.0"), dir.path());
    assert_eq!(updater.update().await.unwrap(), UpdateOutcome::UpToDate);
    assert_eq!(updater.state(), UpdateState::UpToDate);
}

#[tokio::test]
async fn test_update_ready() {
    let fx = start_server(false, None).await;
    let data = payload(70_000, 13);
    publish(&fx.server.client, "sensor-v1", "1.0", payload(32, 14)).await;
    publish(&fx.server.client, "sensor-v1", "1.1", data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let mut updater = updater(&fx.server, Some("1.0"), dir.path());

    let ready = match updater.update().await.unwrap() {
        UpdateOutcome::Ready(ready) => ready,
        other => panic!("expected ready, got {:?}", other),
    };
    assert_eq!(ready.version(), &v("1.1"));
    assert_eq!(updater.state(), UpdateState::Ready);
    assert_eq!(tokio::fs::read(ready.path()).await.unwrap(), data.to_vec());

    let taken = updater.take_ready().unwrap();
    assert_eq!(taken, ready);
    updater.set_current_version(taken.version().clone());
    assert_eq!(updater.update().await.unwrap(), UpdateOutcome::UpToDate);
}

#[tokio::test]
async fn test_step_by_step_update() {
    let fx = start_server(false, None).await;
    let data = payload(5_000, 15);
    publish(&fx.server.client, "sensor-v1", "2.0", data.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let mut updater = updater(&fx.server, None, dir.path());

    let check = updater.check_for_update().await.unwrap();
    assert!(check.update_available);
    assert_eq!(updater.state(), UpdateState::Idle);
    let pending = updater.pending().cloned().unwrap();

    let file = updater.download_firmware(&pending.version).await.unwrap();
    assert_eq!(updater.state(), UpdateState::Downloading);
    assert!(updater.verify_firmware(file, &pending.digest).await.unwrap());
    assert_eq!(updater.state(), UpdateState::Ready);
}

#[tokio::test]
async fn test_corrupted_artifact_is_rejected() {
    let fx = start_server(false, None).await;
    let data = payload(20_000, 16);
    publish(&fx.server.client, "sensor-v1", "1.0", data.clone()).await;

    // Flip bytes of the stored artifact in place; the registry digest stays.
    let stored = fx.storage.join("sensor-v1").join("1.0").join("fw.bin");
    let mut tampered = data.to_vec();
    tampered[100] ^= 0xff;
    std::fs::write(&stored, &tampered).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut updater = updater(&fx.server, None, dir.path());

    match updater.update().await.unwrap() {
        UpdateOutcome::Rejected {
            version,
            expected_digest,
            actual_digest,
        } => {
            assert_eq!(version, v("1.0"));
            assert_eq!(expected_digest, digest::digest_bytes(&data));
            assert_eq!(actual_digest, digest::digest_bytes(&tampered));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(updater.state(), UpdateState::Rejected);
    assert!(updater.take_ready().is_none());

    let mut entries = std::fs::read_dir(dir.path()).unwrap();
    assert!(entries.next().is_none(), "rejected download must be deleted");

    // Repairing the artifact lets the same version through on retry.
    std::fs::write(&stored, &data).unwrap();
    assert!(matches!(updater.update().await.unwrap(), UpdateOutcome::Ready(_)));
}

#[tokio::test]
async fn test_update_against_unreachable_server() {
    let fx = start_server(false, None).await;
    let base = fx.server.base_url();
    fx.server.shutdown().await;

    let dir = tempfile::tempdir().unwrap();
    let client = OtaClient::new(&base).unwrap();
    let mut updater = UpdateClient::new(client, "sensor-v1", None, dir.path());
    let err = updater.update().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(updater.state(), UpdateState::Idle);
}
