//! ota-api - REST API layer of the OTA firmware server
//!
//! This crate maps the [`ota_core::UpdateService`] operations onto HTTP
//! routes. Storage, ordering and integrity live in `ota-core`; this layer
//! only parses requests, streams bodies and translates errors.
//!
//! # Usage
//!
//! ```ignore
//! use ota_api::{create_router, AppState};
//! use ota_core::{ServiceConfig, UpdateService};
//!
//! let service = UpdateService::open(ServiceConfig::new("firmware", "firmware_db.json")).await?;
//! let router = create_router(AppState::new(service));
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use auth::{AuthToken, Caller};
pub use error::ApiError;
pub use state::AppState;

use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::TraceLayer;

/// Default idle timeout on request bodies
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(60);

/// Create the OTA REST API router with the given application state
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, DEFAULT_BODY_TIMEOUT)
}

/// Create the router with a custom request body timeout
///
/// A stalled upload fails with an I/O error after `body_timeout` and its
/// staged bytes are discarded.
pub fn create_router_with_timeout(state: AppState, body_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Device-facing routes
        .route("/api/v1/check_update", get(handlers::check::check_update))
        .route("/api/v1/firmware", get(handlers::firmware::list_all))
        .route(
            "/api/v1/firmware/{device_type}",
            get(handlers::firmware::list_device),
        )
        .route(
            "/api/v1/firmware/{device_type}/latest",
            get(handlers::firmware::get_latest),
        )
        .route(
            "/api/v1/firmware/{device_type}/{version}",
            get(handlers::firmware::get_firmware)
                .post(handlers::upload::upload_firmware)
                .put(handlers::upload::replace_firmware),
        )
        .route(
            "/api/v1/firmware/{device_type}/{version}/download",
            get(handlers::download::download_firmware),
        )
        // Middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(RequestBodyTimeoutLayer::new(body_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use ota_core::{ServiceConfig, UpdateService};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    async fn state(dir: &tempfile::TempDir) -> AppState {
        let config = ServiceConfig::new(dir.path().join("firmware"), dir.path().join("db.json"))
            .with_max_upload_bytes(64);
        AppState::new(UpdateService::open(config).await.unwrap())
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn upload(uri: &str, content: &'static [u8]) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_LENGTH, content.len())
            .body(Body::from(content))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_check_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(&dir).await);

        let response = app
            .clone()
            .oneshot(upload(
                "/api/v1/firmware/sensor-v1/1.2.3?filename=fw.bin&notes=first",
                b"firmware-bytes",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let metadata = json(response).await;
        assert_eq!(metadata["version"], "1.2.3");
        assert_eq!(metadata["size_bytes"], 14);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/check_update?device_type=sensor-v1&current_version=1.0.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let check = json(response).await;
        assert_eq!(check["update_available"], true);
        assert_eq!(check["latest_version"], "1.2.3");
        assert_eq!(
            check["download_url"],
            "/api/v1/firmware/sensor-v1/1.2.3/download"
        );

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/firmware/sensor-v1/1.2.3/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[handlers::download::DIGEST_HEADER],
            metadata["digest"].as_str().unwrap()
        );
        assert_eq!(body_bytes(response).await, b"firmware-bytes");

        let response = app
            .oneshot(
                Request::get("/api/v1/firmware/sensor-v1/1.2.3/download")
                    .header(header::RANGE, "bytes=9-")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 9-13/14");
        assert_eq!(body_bytes(response).await, b"bytes");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(&dir).await);

        let get = |uri: &str| Request::get(uri).body(Body::empty()).unwrap();

        let response = app
            .clone()
            .oneshot(get("/api/v1/check_update?device_type=sensor-v1&current_version=1.0.0"))
            .await
            .unwrap();
        let check = json(response).await;
        assert_eq!(
            check,
            serde_json::json!({ "update_available": false, "current_version": "1.0.0" })
        );

        let response = app.clone().oneshot(get("/api/v1/firmware/sensor-v1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app.clone().oneshot(get("/api/v1/firmware/sensor-v1/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app
            .clone()
            .oneshot(get("/api/v1/firmware/sensor-v1/1.0/download"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(upload("/api/v1/firmware/sensor-v1/1.0", b"one"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app
            .clone()
            .oneshot(upload("/api/v1/firmware/sensor-v1/1.0", b"two"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json(response).await["error"], "conflict");

        let response = app
            .clone()
            .oneshot(upload("/api/v1/firmware/sensor-v1/2.0", &[0u8; 65]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/v1/firmware/sensor-v1/1.0")
                    .body(Body::from("three"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(upload("/api/v1/firmware/sensor-v1/..", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::get("/api/v1/firmware/sensor-v1/1.0/download")
                    .header(header::RANGE, "bytes=3-")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */3");
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await.with_auth(AuthToken::new("s3cret", "operator"));
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/firmware").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/firmware")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/api/v1/firmware")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await, serde_json::json!({ "device_types": {} }));
    }
}
