//! List command - show published firmware

use anyhow::Result;
use ota_client::OtaClient;

use crate::output::{FirmwareRow, OutputContext};

/// List all firmware, or the versions of one device type
pub async fn list(
    client: &OtaClient,
    device_type: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let artifacts = match device_type {
        Some(device_type) => client.list_firmware(device_type).await?.versions,
        None => client.list_all().await?.into_values().flatten().collect(),
    };

    let rows: Vec<FirmwareRow> = artifacts.iter().map(FirmwareRow::from).collect();
    ctx.print(&rows);
    Ok(())
}
