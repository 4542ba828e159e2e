//! Download command - fetch and verify one version

use std::path::Path;

use anyhow::{bail, Context, Result};
use ota_client::{digest, OtaClient, Version};

use crate::output::OutputContext;

/// Download a version into `out_dir` and check its digest
///
/// A mismatching file is deleted. Re-running after an interruption resumes
/// from the partial file.
pub async fn download(
    client: &OtaClient,
    device_type: &str,
    version: &Version,
    out_dir: &Path,
    ctx: &OutputContext,
) -> Result<()> {
    let pb = ctx.spinner(&format!("Downloading {} {}", device_type, version));
    let result = client.download_firmware(device_type, version, out_dir).await;
    pb.finish_and_clear();
    let file = result.context("Download failed")?;

    let expected = &file.metadata().digest;
    let actual = digest::digest_file(file.path()).await?;
    if !digest::digests_match(&actual, expected) {
        tokio::fs::remove_file(file.path()).await.ok();
        bail!(
            "Digest mismatch for {} {}: expected {}, got {}",
            device_type,
            version,
            expected,
            actual
        );
    }

    ctx.success(&format!("Verified {}", file.path().display()));
    if ctx.quiet {
        println!("{}", file.path().display());
    }
    Ok(())
}
