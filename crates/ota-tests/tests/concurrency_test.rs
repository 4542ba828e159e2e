//! Concurrency tests: uploads racing downloads and each other
//!
//! In-flight uploads are driven through a channel-backed request body, so a
//! test decides exactly when the upload makes progress.

use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc;
use ota_client::testing::wait_for;
use ota_client::{digest, ClientError};
use ota_tests::{firmware_image, version_of, TestHarness};
use pretty_assertions::assert_eq;
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;

type Chunk = Result<Bytes, std::io::Error>;

/// Start a POST whose body is fed through the returned sender
fn start_streaming_upload(
    harness: &TestHarness,
    device_type: &str,
    version: &str,
    total_len: u64,
) -> (
    mpsc::UnboundedSender<Chunk>,
    tokio::task::JoinHandle<reqwest::Result<reqwest::Response>>,
) {
    let (tx, rx) = mpsc::unbounded::<Chunk>();
    let request = harness
        .http
        .post(harness.url(&format!("/api/v1/firmware/{}/{}", device_type, version)))
        .header(CONTENT_LENGTH, total_len)
        .body(reqwest::Body::wrap_stream(rx));
    (tx, tokio::spawn(request.send()))
}

async fn staging_in_use(harness: &TestHarness) -> bool {
    wait_for(|| async { harness.staging_count() > 0 }, Duration::from_secs(5)).await
}

#[tokio::test]
async fn test_download_unaffected_by_upload_in_progress() {
    let harness = TestHarness::start().await;
    let shipped = firmware_image(200_000, 1);
    harness.publish("sensor-v1", "1.0.0", &shipped).await;

    let incoming = firmware_image(150_000, 2);
    let (tx, upload) =
        start_streaming_upload(&harness, "sensor-v1", "1.1.0", incoming.len() as u64);
    tx.unbounded_send(Ok(Bytes::copy_from_slice(&incoming[..50_000])))
        .unwrap();
    assert!(staging_in_use(&harness).await, "upload never reached staging");

    // Published version downloads completely while 1.1.0 is half-staged.
    let response = harness
        .http
        .get(harness.url("/api/v1/firmware/sensor-v1/1.0.0/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(digest::digest_bytes(&body), digest::digest_bytes(&shipped));

    // The uncommitted version is invisible, never partially served.
    let pending = harness
        .http
        .get(harness.url("/api/v1/firmware/sensor-v1/1.1.0/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(pending.status(), StatusCode::NOT_FOUND);

    let check = harness.client().check_update("sensor-v1", None).await.unwrap();
    assert_eq!(check.latest_version, Some(version_of("1.0.0")));
    assert!(!harness.artifact_path("sensor-v1", "1.1.0", "fw.bin").exists());

    tx.unbounded_send(Ok(Bytes::copy_from_slice(&incoming[50_000..])))
        .unwrap();
    drop(tx);
    let response = upload.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let dir = harness.download_dir("device");
    let file = harness
        .client()
        .download_firmware("sensor-v1", &version_of("1.1.0"), &dir)
        .await
        .unwrap();
    assert_eq!(std::fs::read(file.path()).unwrap(), incoming);
}

#[tokio::test]
async fn test_aborted_upload_leaves_nothing_behind() {
    let harness = TestHarness::start().await;

    let (tx, upload) = start_streaming_upload(&harness, "sensor-v1", "2.0.0", 100_000);
    tx.unbounded_send(Ok(Bytes::from(vec![1u8; 30_000]))).unwrap();
    assert!(staging_in_use(&harness).await, "upload never reached staging");

    tx.unbounded_send(Err(std::io::Error::other("client gave up")))
        .unwrap();
    drop(tx);
    assert!(upload.await.unwrap().is_err());

    assert!(
        wait_for(|| async { harness.staging_count() == 0 }, Duration::from_secs(5)).await,
        "staged bytes not discarded"
    );
    let err = harness
        .client()
        .get_firmware("sensor-v1", &version_of("2.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert!(!harness.artifact_path("sensor-v1", "2.0.0", "fw.bin").exists());

    // The version is still free to publish.
    harness.publish("sensor-v1", "2.0.0", b"retry").await;
}

#[tokio::test]
async fn test_concurrent_uploads_of_distinct_versions_all_land() {
    let harness = TestHarness::start().await;
    let client = harness.client();

    let uploads = (0..12u8).map(|i| {
        let client = client.clone();
        async move {
            client
                .upload_bytes(
                    "sensor-v1",
                    &version_of(&format!("1.{}.0", i)),
                    "fw.bin",
                    Bytes::from(firmware_image(4096, i)),
                    None,
                    false,
                )
                .await
        }
    });
    for result in futures::future::join_all(uploads).await {
        result.unwrap();
    }

    let listing = client.list_firmware("sensor-v1").await.unwrap();
    assert_eq!(listing.versions.len(), 12);
    assert_eq!(listing.latest_version, version_of("1.11.0"));

    // Nothing was lost between memory and disk.
    let mut harness = harness;
    harness.restart().await;
    let reloaded = harness.client().list_firmware("sensor-v1").await.unwrap();
    assert_eq!(reloaded.versions, listing.versions);
}

#[tokio::test]
async fn test_concurrent_uploads_of_same_version_publish_once() {
    let harness = TestHarness::start().await;
    let client = harness.client();

    let uploads = (0..8u8).map(|i| {
        let client = client.clone();
        async move {
            client
                .upload_bytes(
                    "sensor-v1",
                    &version_of("3.0.0"),
                    &format!("fw-{}.bin", i),
                    Bytes::from(firmware_image(8192, i)),
                    None,
                    false,
                )
                .await
        }
    });
    let results = futures::future::join_all(uploads).await;

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ClientError::Conflict(_))));

    let stored = client.get_firmware("sensor-v1", &version_of("3.0.0")).await.unwrap();
    assert_eq!(&stored, winners[0]);

    let dir = harness.download_dir("device");
    let file = client
        .download_artifact(&stored, &dir)
        .await
        .unwrap();
    assert!(digest::verify_file(file.path(), &stored.digest).await.unwrap());
}

#[tokio::test]
async fn test_parallel_downloads_share_an_artifact() {
    let harness = TestHarness::start().await;
    let content = firmware_image(180_000, 9);
    let meta = harness.publish("sensor-v1", "1.0.0", &content).await;

    let downloads = (0..6).map(|i| {
        let client = harness.client();
        let dir = harness.download_dir(&format!("device-{}", i));
        let meta = meta.clone();
        async move { client.download_artifact(&meta, &dir).await }
    });
    for result in futures::future::join_all(downloads).await {
        let file = result.unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), content);
    }
}
