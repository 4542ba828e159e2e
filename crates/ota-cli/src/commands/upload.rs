//! Upload command - publish a firmware file

use std::path::Path;

use anyhow::{Context, Result};
use ota_client::{OtaClient, Version};

use crate::output::{format_size, metadata_pairs, OutputContext};

/// Upload a firmware file, streamed from disk
pub async fn upload(
    client: &OtaClient,
    device_type: &str,
    version: &Version,
    file: &Path,
    notes: Option<&str>,
    replace: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to read firmware file: {}", file.display()))?
        .len();

    let verb = if replace { "Replacing" } else { "Uploading" };
    let pb = ctx.spinner(&format!(
        "{} {} {} ({})",
        verb,
        device_type,
        version,
        format_size(size)
    ));

    let result = client
        .upload_file(device_type, version, file, notes, replace)
        .await;
    pb.finish_and_clear();
    let metadata = result.context("Upload failed")?;

    ctx.success(&format!("Published {} {}", metadata.device_type, metadata.version));
    ctx.print_kv(&metadata_pairs(&metadata));
    Ok(())
}
