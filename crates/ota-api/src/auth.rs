//! Bearer token authentication middleware
//!
//! Validates `Authorization: Bearer <token>` on all requests except `/health`.
//! An accepted token attaches its [`Identity`] to the request, which handlers
//! pick up through the [`Caller`] extractor for audit logging. Without a
//! configured token every request passes through as anonymous.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use ota_core::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Expected bearer token and the identity it grants
#[derive(Clone)]
pub struct AuthToken {
    token: String,
    identity: Identity,
}

impl AuthToken {
    pub fn new(token: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            identity: Identity::named(identity),
        }
    }

    fn matches(&self, provided: &str) -> bool {
        provided == self.token
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Axum middleware function that checks bearer token authentication.
///
/// Skips auth for `/health` endpoint. Returns 401 if token is missing or invalid.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.auth() else {
        return Ok(next.run(request).await);
    };

    // Skip auth for health endpoint
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if expected.matches(token) => {
            request.extensions_mut().insert(expected.identity.clone());
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Invalid bearer token");
            Err(ApiError::Unauthorized("Invalid bearer token".to_string()))
        }
        None => {
            tracing::warn!(
                path = %request.uri().path(),
                "Missing or malformed Authorization header"
            );
            Err(ApiError::Unauthorized(
                "Missing or malformed Authorization header".to_string(),
            ))
        }
    }
}

/// Identity of the authenticated caller, anonymous when auth is disabled
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(
            parts.extensions.get::<Identity>().cloned().unwrap_or_default(),
        ))
    }
}
