//! Daemon configuration (TOML)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ota_api::AuthToken;
use ota_core::{ServiceConfig, DEFAULT_MAX_UPLOAD_BYTES};
use serde::Deserialize;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Artifact root directory
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Registry document
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Upload ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Enables the PUT replace route
    #[serde(default)]
    pub allow_replace: bool,

    /// Bearer token required on all routes but `/health`
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Audit identity of requests carrying the token
    #[serde(default = "default_auth_identity")]
    pub auth_identity: String,

    /// Idle timeout for upload bodies, in seconds
    #[serde(default = "default_body_timeout_secs")]
    pub body_timeout_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8070))
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("firmware")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("firmware_db.json")
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_auth_identity() -> String {
    "operator".to_string()
}

fn default_body_timeout_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            storage_dir: default_storage_dir(),
            registry_path: default_registry_path(),
            max_upload_bytes: default_max_upload_bytes(),
            allow_replace: false,
            auth_token: None,
            auth_identity: default_auth_identity(),
            body_timeout_secs: default_body_timeout_secs(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.max_upload_bytes > 0, "max_upload_bytes must be positive");
        anyhow::ensure!(config.body_timeout_secs > 0, "body_timeout_secs must be positive");
        if let Some(token) = &config.auth_token {
            anyhow::ensure!(!token.is_empty(), "auth_token must not be empty");
        }
        Ok(config)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(&self.storage_dir, &self.registry_path)
            .with_max_upload_bytes(self.max_upload_bytes)
            .with_allow_replace(self.allow_replace)
    }

    pub fn auth(&self) -> Option<AuthToken> {
        self.auth_token
            .as_ref()
            .map(|token| AuthToken::new(token.clone(), self.auth_identity.clone()))
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.bind, "0.0.0.0:8070".parse().unwrap());
        assert_eq!(config.storage_dir, PathBuf::from("firmware"));
        assert_eq!(config.registry_path, PathBuf::from("firmware_db.json"));
        assert_eq!(config.max_upload_bytes, 104_857_600);
        assert!(!config.allow_replace);
        assert!(config.auth().is_none());
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.body_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_full_config() {
        let config = ServerConfig::from_toml(
            r#"
bind = "127.0.0.1:9000"
storage_dir = "/srv/ota/firmware"
registry_path = "/srv/ota/registry.json"
max_upload_bytes = 1048576
allow_replace = true
auth_token = "s3cret"
auth_identity = "release-bot"
body_timeout_secs = 5
log_format = "json"
"#,
        )
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.max_upload_bytes, 1_048_576);
        assert!(config.allow_replace);
        assert_eq!(config.auth_identity, "release-bot");
        assert!(config.auth().is_some());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ServerConfig::from_toml("port = 8070").is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServerConfig::from_toml("max_upload_bytes = 0").is_err());
        assert!(ServerConfig::from_toml("auth_token = \"\"").is_err());
        assert!(ServerConfig::from_toml("log_format = \"xml\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otad.toml");
        std::fs::write(&path, "allow_replace = true\n").unwrap();
        assert!(ServerConfig::load(&path).unwrap().allow_replace);
        assert!(ServerConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
