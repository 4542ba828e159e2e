//! ota-core - Firmware registry, artifact storage and integrity primitives
//!
//! This crate holds everything an OTA server needs below the transport:
//! version ordering, streaming digests, the atomic artifact store, the
//! persisted registry and the update service composing them.

pub mod digest;
pub mod error;
pub mod models;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod version;

pub use error::{OtaError, OtaResult};
pub use models::*;
pub use registry::Registry;
pub use service::{
    ConsistencyReport, Download, ServiceConfig, UpdateService, DEFAULT_MAX_UPLOAD_BYTES,
};
pub use session::DownloadSession;
pub use store::{ArtifactKey, ArtifactReader, ArtifactStore, CommittedArtifact, StagedArtifact};
pub use version::Version;
