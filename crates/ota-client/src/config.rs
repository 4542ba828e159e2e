//! Client configuration with YAML support

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// OTA client configuration
///
/// Can be loaded from YAML or JSON, or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Identity of the device being updated
    pub device: DeviceConfig,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the server
    pub base_url: String,

    /// Bearer token sent with every request (optional)
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device type the firmware lineage belongs to
    pub device_type: String,

    /// Version currently installed, if any
    #[serde(default)]
    pub current_version: Option<String>,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory downloads are written to
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// General request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Upload/download timeout in milliseconds (default: 10 minutes)
    #[serde(default = "default_transfer_timeout")]
    pub transfer_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
            transfer_ms: default_transfer_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_transfer_timeout() -> u64 {
    600_000 // 10 minutes
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(
        base_url: impl Into<String>,
        device_type: impl Into<String>,
    ) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url, device_type)
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the given base URL and device type
    pub fn new(base_url: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                connection: ConnectionConfig {
                    base_url: base_url.into(),
                    bearer_token: None,
                },
                device: DeviceConfig {
                    device_type: device_type.into(),
                    current_version: None,
                },
                storage: StorageConfig::default(),
                timeouts: TimeoutsConfig::default(),
            },
        }
    }

    /// Set the bearer token
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.connection.bearer_token = Some(token.into());
        self
    }

    /// Set the installed version
    pub fn current_version(mut self, version: impl Into<String>) -> Self {
        self.config.device.current_version = Some(version.into());
        self
    }

    /// Set the download directory
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.download_dir = dir.into();
        self
    }

    /// Set request timeout in milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.request_ms = ms;
        self
    }

    /// Set transfer timeout in milliseconds
    pub fn transfer_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.transfer_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  base_url: "http://localhost:8070"
  bearer_token: "secret123"

device:
  device_type: "sensor-v1"
  current_version: "1.0.0"

timeouts:
  request_ms: 5000
"#;

        let config = ClientConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.base_url, "http://localhost:8070");
        assert_eq!(config.connection.bearer_token, Some("secret123".to_string()));
        assert_eq!(config.device.device_type, "sensor-v1");
        assert_eq!(config.device.current_version, Some("1.0.0".to_string()));
        assert_eq!(config.storage.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.timeouts.request_ms, 5000);
        assert_eq!(config.timeouts.connect_ms, 10_000);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "connection": { "base_url": "http://ota.local:8070" },
            "device": { "device_type": "gateway" },
            "storage": { "download_dir": "/var/lib/ota" }
        }"#;

        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.connection.bearer_token, None);
        assert_eq!(config.storage.download_dir, PathBuf::from("/var/lib/ota"));
        assert_eq!(config.timeouts.transfer_ms, 600_000);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder("http://localhost:8070", "sensor-v1")
            .bearer_token("my-secret")
            .current_version("1.2.3")
            .download_dir("/tmp/ota")
            .request_timeout_ms(1_000)
            .build();

        assert_eq!(config.connection.bearer_token, Some("my-secret".to_string()));
        assert_eq!(config.device.current_version, Some("1.2.3".to_string()));
        assert_eq!(config.storage.download_dir, PathBuf::from("/tmp/ota"));
        assert_eq!(config.timeouts.request_ms, 1_000);
    }

    #[test]
    fn test_to_yaml() {
        let config = ClientConfig::builder("http://localhost:8070", "sensor-v1").build();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("base_url"));
        assert!(yaml.contains("sensor-v1"));
    }

    #[test]
    fn test_missing_device_is_an_error() {
        let yaml = "connection:\n  base_url: http://localhost:8070\n";
        assert!(ClientConfig::from_yaml(yaml).is_err());
    }
}
