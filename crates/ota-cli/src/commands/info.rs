//! Info command - show metadata of one version

use anyhow::{Context, Result};
use ota_client::{OtaClient, Version};

use crate::output::{metadata_pairs, OutputContext};

/// Show metadata of a version; "latest" resolves to the newest one
pub async fn info(
    client: &OtaClient,
    device_type: &str,
    version: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let metadata = if version == "latest" {
        client.latest(device_type).await?
    } else {
        let version = Version::parse(version).context("Invalid version")?;
        client.get_firmware(device_type, &version).await?
    };

    ctx.print_kv(&metadata_pairs(&metadata));
    Ok(())
}
