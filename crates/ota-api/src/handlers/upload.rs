//! Firmware upload handlers
//!
//! The request body is the raw artifact. It is streamed straight into the
//! artifact store, so uploads are never buffered in memory.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use ota_core::{ArtifactMetadata, OtaError, OtaResult, UploadRequest, Version};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters of an upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Artifact filename, sanitized; defaults to `firmware.bin`
    pub filename: Option<String>,
    /// Release notes
    pub notes: Option<String>,
}

/// POST /api/v1/firmware/{device_type}/{version}
/// Publish a new firmware version
pub async fn upload_firmware(
    State(state): State<AppState>,
    Path((device_type, version)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    Caller(identity): Caller,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<ArtifactMetadata>), ApiError> {
    let request = upload_request(&device_type, &version, &query)?;
    let metadata = state
        .service()
        .upload_firmware(request, content_length(&headers), data_stream(body), &identity)
        .await?;

    tracing::info!(
        device_type = %metadata.device_type,
        version = %metadata.version,
        size = metadata.size_bytes,
        "Firmware uploaded"
    );

    Ok((StatusCode::CREATED, Json(metadata)))
}

/// PUT /api/v1/firmware/{device_type}/{version}
/// Replace the artifact of a published version (if enabled)
pub async fn replace_firmware(
    State(state): State<AppState>,
    Path((device_type, version)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    Caller(identity): Caller,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ArtifactMetadata>, ApiError> {
    let request = upload_request(&device_type, &version, &query)?;
    let metadata = state
        .service()
        .replace_firmware(request, content_length(&headers), data_stream(body), &identity)
        .await?;

    tracing::info!(
        device_type = %metadata.device_type,
        version = %metadata.version,
        size = metadata.size_bytes,
        "Firmware replaced"
    );

    Ok(Json(metadata))
}

fn upload_request(
    device_type: &str,
    version: &str,
    query: &UploadQuery,
) -> OtaResult<UploadRequest> {
    UploadRequest::new(
        device_type,
        Version::parse(version)?,
        query.filename.as_deref().filter(|f| !f.is_empty()),
        query.notes.as_deref(),
    )
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Request body as a stream of chunks, transport failures mapped to I/O errors
fn data_stream(body: Body) -> impl Stream<Item = OtaResult<Bytes>> + Send {
    body.into_data_stream().map(|chunk| {
        chunk.map_err(|e| match e.into_inner().downcast::<std::io::Error>() {
            Ok(io) => OtaError::from(*io),
            Err(other) => OtaError::Io(std::io::Error::other(other)),
        })
    })
}
