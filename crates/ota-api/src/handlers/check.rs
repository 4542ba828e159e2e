//! Update check handler

use axum::extract::{Query, State};
use axum::Json;
use ota_core::{ArtifactMetadata, Version};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters of an update check
#[derive(Debug, Deserialize)]
pub struct CheckUpdateQuery {
    pub device_type: String,
    /// Version the device currently runs; absent or empty means none
    #[serde(default)]
    pub current_version: Option<String>,
}

/// Response for an update check
#[derive(Debug, Serialize)]
pub struct CheckUpdateResponse {
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
    /// Where to fetch the update, only when one is available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Metadata of the update, only when one is available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

/// GET /api/v1/check_update?device_type=&current_version=
pub async fn check_update(
    State(state): State<AppState>,
    Query(query): Query<CheckUpdateQuery>,
) -> Result<Json<CheckUpdateResponse>, ApiError> {
    let current = match query.current_version.as_deref() {
        None | Some("") => None,
        Some(v) => Some(Version::parse(v)?),
    };

    let result = state
        .service()
        .check_update(&query.device_type, current.as_ref());

    tracing::debug!(
        device_type = %query.device_type,
        current_version = ?current.as_ref().map(Version::as_str),
        update_available = result.update_available,
        "Update check"
    );

    let (download_url, metadata) = match result.metadata {
        Some(metadata) if result.update_available => (
            Some(format!(
                "/api/v1/firmware/{}/{}/download",
                metadata.device_type, metadata.version
            )),
            Some(metadata),
        ),
        _ => (None, None),
    };

    Ok(Json(CheckUpdateResponse {
        update_available: result.update_available,
        latest_version: result.latest_version,
        current_version: current,
        download_url,
        metadata,
    }))
}
