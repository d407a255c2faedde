//! Artifact key layout and content digests.
//!
//! Stage outputs live under `jobs/{job_id}/{stage}/{name}`, ingress uploads
//! under `uploads/{uuid}/{filename}`.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use adscan_models::{ArtifactRef, JobId, StageName};

use crate::error::{StorageError, StorageResult};

/// A validated object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Validate a raw key: relative, `/`-separated, no empty or dot segments.
    pub fn parse(raw: impl Into<String>) -> StorageResult<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.starts_with('/') || raw.contains('\\') {
            return Err(StorageError::invalid_key(raw));
        }
        if raw.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(StorageError::invalid_key(raw));
        }
        Ok(Self(raw))
    }

    /// Output of one pipeline stage.
    pub fn stage(job_id: &JobId, stage: StageName, name: &str) -> StorageResult<Self> {
        Self::parse(format!("jobs/{}/{}/{}", job_id, stage.as_str(), sanitize_file_name(name)))
    }

    /// A client upload under a fresh namespace.
    pub fn upload(upload_id: &str, file_name: &str) -> StorageResult<Self> {
        Self::parse(format!("uploads/{}/{}", upload_id, sanitize_file_name(file_name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef::new(self.0.clone())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&ArtifactRef> for ArtifactKey {
    type Error = StorageError;

    fn try_from(artifact: &ArtifactRef) -> Result<Self, Self::Error> {
        Self::parse(artifact.as_str())
    }
}

/// Keep the last path component and replace anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A stored object and the digest of what was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub artifact: ArtifactRef,
    /// Lowercase hex SHA-256
    pub digest: String,
    pub size: u64,
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file, streamed.
pub async fn digest_file(path: &Path) -> StorageResult<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}
