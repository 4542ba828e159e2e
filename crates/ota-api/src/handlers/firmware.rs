//! Firmware listing and metadata handlers

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use ota_core::{ArtifactMetadata, Version};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for listing the whole registry
#[derive(Debug, Serialize)]
pub struct FirmwareIndexResponse {
    /// Versions per device type, ascending
    pub device_types: BTreeMap<String, Vec<ArtifactMetadata>>,
}

/// Response for listing one device type
#[derive(Debug, Serialize)]
pub struct DeviceFirmwareResponse {
    pub device_type: String,
    /// Greatest published version
    pub latest_version: Version,
    /// Published versions, ascending
    pub versions: Vec<ArtifactMetadata>,
}

/// GET /api/v1/firmware
pub async fn list_all(State(state): State<AppState>) -> Json<FirmwareIndexResponse> {
    Json(FirmwareIndexResponse {
        device_types: state.service().list_all(),
    })
}

/// GET /api/v1/firmware/{device_type}
pub async fn list_device(
    State(state): State<AppState>,
    Path(device_type): Path<String>,
) -> Result<Json<DeviceFirmwareResponse>, ApiError> {
    let versions = state.service().list_firmware(&device_type)?;
    let latest_version = ota_core::version::max(versions.iter().map(|m| &m.version))?.clone();

    Ok(Json(DeviceFirmwareResponse {
        device_type,
        latest_version,
        versions,
    }))
}

/// GET /api/v1/firmware/{device_type}/latest
pub async fn get_latest(
    State(state): State<AppState>,
    Path(device_type): Path<String>,
) -> Result<Json<ArtifactMetadata>, ApiError> {
    Ok(Json(state.service().latest(&device_type)?))
}

/// GET /api/v1/firmware/{device_type}/{version}
pub async fn get_firmware(
    State(state): State<AppState>,
    Path((device_type, version)): Path<(String, String)>,
) -> Result<Json<ArtifactMetadata>, ApiError> {
    let version = Version::parse(&version)?;
    Ok(Json(state.service().get(&device_type, &version)?))
}
