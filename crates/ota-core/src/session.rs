//! Server-side state of one in-flight download

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::Identity;
use crate::version::Version;

/// Progress of a single firmware transfer
///
/// Lives as long as the response body. Dropping it emits the audit event:
/// a completed transfer is logged as a download, anything else as a torn-down
/// transfer.
#[derive(Debug)]
pub struct DownloadSession {
    id: Uuid,
    device_type: String,
    version: Version,
    digest: String,
    identity: Identity,
    start_offset: u64,
    total_size: u64,
    sent: u64,
}

impl DownloadSession {
    pub fn new(
        device_type: &str,
        version: &Version,
        digest: &str,
        identity: Identity,
        start_offset: u64,
        total_size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_type: device_type.to_string(),
            version: version.clone(),
            digest: digest.to_string(),
            identity,
            start_offset,
            total_size,
            sent: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record `n` more bytes handed to the transport
    pub fn record(&mut self, n: usize) {
        self.sent += n as u64;
    }

    /// Current absolute byte offset into the artifact
    pub fn offset(&self) -> u64 {
        self.start_offset + self.sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    pub fn is_complete(&self) -> bool {
        self.offset() >= self.total_size
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        if self.is_complete() {
            info!(
                target: "audit",
                event = "download",
                session_id = %self.id,
                device_type = %self.device_type,
                version = %self.version,
                digest = %self.digest,
                identity = %self.identity,
                start_offset = self.start_offset,
                bytes_sent = self.sent,
                "Firmware download completed"
            );
        } else {
            warn!(
                session_id = %self.id,
                device_type = %self.device_type,
                version = %self.version,
                identity = %self.identity,
                offset = self.offset(),
                total_size = self.total_size,
                "Firmware download torn down before completion"
            );
        }
    }
}
