//! Application state for the OTA API

use std::sync::Arc;

use ota_core::UpdateService;

use crate::auth::AuthToken;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    service: Arc<UpdateService>,
    /// Bearer token required on every route but `/health`, if set
    auth: Option<AuthToken>,
}

impl AppState {
    /// Create a new AppState without authentication
    pub fn new(service: UpdateService) -> Self {
        Self::from_arc(Arc::new(service))
    }

    /// Create a new AppState around an already shared service
    pub fn from_arc(service: Arc<UpdateService>) -> Self {
        Self {
            service,
            auth: None,
        }
    }

    /// Require a bearer token
    pub fn with_auth(mut self, token: AuthToken) -> Self {
        self.auth = Some(token);
        self
    }

    pub fn service(&self) -> &UpdateService {
        &self.service
    }

    pub fn auth(&self) -> Option<&AuthToken> {
        self.auth.as_ref()
    }
}
