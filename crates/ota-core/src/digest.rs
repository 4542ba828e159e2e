//! Artifact integrity: streaming SHA-256 digests
//!
//! Artifacts can be tens of megabytes, so digests are always computed over
//! fixed-size chunks. A digest mismatch is an expected outcome and is reported
//! as `false`, never as an error; only I/O failures surface as `Err`.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::OtaResult;

/// Read size used when hashing a stream
pub const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Name of the digest algorithm, as advertised to clients
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Incremental digest over chunks fed by the caller
///
/// Used where the bytes are already flowing through for another purpose
/// (e.g. being written to staging) so the stream is read exactly once.
#[derive(Debug, Clone, Default)]
pub struct DigestBuilder {
    hasher: Sha256,
    len: u64,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowercase hex digest of everything fed so far
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Digest of an in-memory buffer
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Digest of a byte stream, read in [`DIGEST_CHUNK_SIZE`] chunks until exhaustion
pub async fn digest<R>(mut reader: R) -> OtaResult<String>
where
    R: AsyncRead + Unpin,
{
    let mut builder = DigestBuilder::new();
    let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        builder.update(&buf[..n]);
    }
    Ok(builder.finalize())
}

/// Check a stream against an expected digest
pub async fn verify<R>(reader: R, expected: &str) -> OtaResult<bool>
where
    R: AsyncRead + Unpin,
{
    let actual = digest(reader).await?;
    Ok(digests_match(&actual, expected))
}

/// Digest of a file on disk
pub async fn digest_file(path: impl AsRef<Path>) -> OtaResult<String> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    digest(file).await
}

/// Check a file on disk against an expected digest
pub async fn verify_file(path: impl AsRef<Path>, expected: &str) -> OtaResult<bool> {
    let actual = digest_file(path).await?;
    Ok(digests_match(&actual, expected))
}

/// Compare two hex digests, ignoring case
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.len() == DIGEST_HEX_LEN && actual.eq_ignore_ascii_case(expected.trim())
}

/// Whether `s` looks like a hex-encoded SHA-256 digest
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
