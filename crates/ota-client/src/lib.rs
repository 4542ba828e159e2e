//! OTA Client Library
//!
//! Device-side access to an OTA firmware server: update checks, resumable
//! downloads and digest verification.
//!
//! # Example
//!
//! ```rust,no_run
//! use ota_client::{ClientConfig, UpdateClient, UpdateOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::builder("http://localhost:8070", "sensor-v1")
//!         .current_version("1.0.0")
//!         .download_dir("/var/lib/ota")
//!         .build();
//!     let mut updater = UpdateClient::from_config(&config)?;
//!
//!     match updater.update().await? {
//!         UpdateOutcome::UpToDate => println!("up to date"),
//!         UpdateOutcome::Ready(artifact) => println!("flash {}", artifact.path().display()),
//!         UpdateOutcome::Rejected { version, .. } => println!("{} failed verification", version),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module runs a router on an ephemeral port:
//!
//! ```rust,ignore
//! use ota_client::testing::TestServer;
//! use ota_api::{create_router, AppState};
//!
//! let server = TestServer::start(create_router(state)).await?;
//! let firmware = server.client.list_all().await?;
//! ```

mod client;
pub mod config;
mod error;
pub mod testing;
mod types;
pub mod updater;

pub use client::{local_filename, partial_path, OtaClient, PART_SUFFIX};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use types::*;
pub use updater::{ReadyArtifact, UpdateClient, UpdateOutcome, UpdateState};

// Re-export core types for convenience
pub use ota_core::{digest, ArtifactMetadata, Version};
