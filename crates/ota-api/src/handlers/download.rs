//! Firmware download handler
//!
//! Streams a committed artifact from a byte offset. The offset comes from a
//! `Range: bytes=N-` header (answered with 206) or an `?offset=N` query
//! parameter. Other range forms are ignored and the whole artifact is sent.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use ota_core::digest::DIGEST_CHUNK_SIZE;
use ota_core::{ArtifactReader, DownloadSession, OtaError, Version};
use serde::Deserialize;
use tokio::io::AsyncReadExt;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the hex SHA-256 of the whole artifact
pub const DIGEST_HEADER: &str = "x-firmware-digest";
/// Header carrying the artifact version
pub const VERSION_HEADER: &str = "x-firmware-version";
/// Header carrying the total artifact size
pub const SIZE_HEADER: &str = "x-firmware-size";

/// Query parameters of a download
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Resume offset, used when no Range header is sent
    pub offset: Option<u64>,
}

/// Parse `bytes=N-`; `None` for anything else
pub fn parse_range(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let start = spec.strip_suffix('-')?;
    start.parse().ok()
}

/// GET /api/v1/firmware/{device_type}/{version}/download
pub async fn download_firmware(
    State(state): State<AppState>,
    Path((device_type, version)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    Caller(identity): Caller,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let version = Version::parse(&version)?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);
    let offset = range.or(query.offset).unwrap_or(0);

    // an offset at or past the end leaves nothing to resume
    let metadata = state.service().get(&device_type, &version)?;
    if offset > 0 && offset >= metadata.size_bytes {
        return Err(OtaError::RangeNotSatisfiable {
            offset,
            size: metadata.size_bytes,
        }
        .into());
    }

    let download = state
        .service()
        .download_firmware(&device_type, &version, offset, identity)
        .await?;
    let metadata = download.metadata;
    let size = download.reader.size();
    let remaining = download.reader.remaining();

    tracing::info!(
        device_type = %device_type,
        version = %version,
        session_id = %download.session.id(),
        identity = %download.session.identity(),
        offset,
        remaining,
        "Firmware download started"
    );

    let partial = range.is_some() || offset > 0;
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut response = (
        status,
        Body::from_stream(artifact_stream(download.reader, download.session)),
    )
        .into_response();

    let out = response.headers_mut();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(remaining));
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if partial {
        let content_range = format!("bytes {}-{}/{}", offset, size.saturating_sub(1), size);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            out.insert(header::CONTENT_RANGE, value);
        }
    }
    let disposition = format!("attachment; filename=\"{}\"", metadata.filename);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        out.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&metadata.digest) {
        out.insert(DIGEST_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(metadata.version.as_str()) {
        out.insert(VERSION_HEADER, value);
    }
    out.insert(SIZE_HEADER, HeaderValue::from(size));

    Ok(response)
}

/// Read the artifact in chunks, recording progress on the session
///
/// The session is owned by the stream, so it ends when the transport drops
/// the body, whether the transfer finished or not.
fn artifact_stream(
    mut reader: ArtifactReader,
    mut session: DownloadSession,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
    async_stream::try_stream! {
        let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            session.record(n);
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}
