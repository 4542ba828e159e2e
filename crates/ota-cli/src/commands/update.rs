//! Update command - full check, download, verify cycle

use std::path::Path;

use anyhow::{bail, Result};
use ota_client::{OtaClient, UpdateClient, UpdateOutcome, Version};
use serde_json::json;

use crate::output::{metadata_pairs, OutputContext, OutputFormat};

/// Run the device update state machine once
pub async fn update(
    client: OtaClient,
    device_type: &str,
    current: Option<Version>,
    out_dir: &Path,
    ctx: &OutputContext,
) -> Result<()> {
    let mut updater = UpdateClient::new(client, device_type, current, out_dir);

    let pb = ctx.spinner(&format!("Updating {}", device_type));
    let result = updater.update().await;
    pb.finish_and_clear();

    match result? {
        UpdateOutcome::UpToDate => {
            if ctx.format == OutputFormat::Json {
                ctx.print_json(&json!({ "status": "up-to-date" }));
            } else {
                ctx.info("Already up to date");
            }
        }
        UpdateOutcome::Ready(artifact) => {
            if ctx.format == OutputFormat::Json {
                ctx.print_json(&json!({
                    "status": "ready",
                    "path": artifact.path(),
                    "metadata": artifact.metadata(),
                }));
            } else {
                ctx.success(&format!(
                    "Ready to flash: {}",
                    artifact.path().display()
                ));
                ctx.print_kv(&metadata_pairs(artifact.metadata()));
            }
        }
        UpdateOutcome::Rejected {
            version,
            expected_digest,
            actual_digest,
        } => {
            bail!(
                "Firmware {} rejected: expected digest {}, got {}",
                version,
                expected_digest,
                actual_digest
            );
        }
    }
    Ok(())
}
