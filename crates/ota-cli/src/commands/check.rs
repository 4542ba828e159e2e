//! Check command - ask for a newer version

use anyhow::Result;
use ota_client::{OtaClient, Version};

use crate::output::{OutputContext, OutputFormat};

/// Ask the server whether an update exists for a device type
pub async fn check(
    client: &OtaClient,
    device_type: &str,
    current: Option<&Version>,
    ctx: &OutputContext,
) -> Result<()> {
    let response = client.check_update(device_type, current).await?;

    if ctx.format == OutputFormat::Json {
        ctx.print_json(&response);
        return Ok(());
    }

    let current = current.map_or_else(|| "none".to_string(), Version::to_string);
    let latest = response
        .latest_version
        .as_ref()
        .map_or_else(|| "none".to_string(), Version::to_string);

    if response.update_available {
        ctx.success(&format!("Update available: {} -> {}", current, latest));
        if let Some(url) = &response.download_url {
            ctx.info(&format!("Download: {}", url));
        }
    } else {
        ctx.info(&format!(
            "Up to date (installed: {}, latest: {})",
            current, latest
        ));
    }
    Ok(())
}
