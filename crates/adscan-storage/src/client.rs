//! R2 (S3-compatible) artifact store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use adscan_models::ArtifactRef;

use crate::error::{StorageError, StorageResult};
use crate::key::{digest, digest_file, ArtifactKey, StoredArtifact};
use crate::store::ArtifactStore;

/// Configuration for the R2 backend.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Artifact store on a Cloudflare R2 bucket.
#[derive(Clone)]
pub struct R2ArtifactStore {
    client: Client,
    bucket: String,
    url_ttl: Duration,
}

impl R2ArtifactStore {
    pub async fn new(config: R2Config, url_ttl: Duration) -> StorageResult<Self> {
        let credentials = Credentials::new(&config.access_key_id, &config.secret_access_key, None, None, "r2");

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            url_ttl,
        })
    }

    async fn upload(&self, key: &ArtifactKey, body: ByteStream, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(())
    }
}

fn map_get_error(key: &str, message: String) -> StorageError {
    if message.contains("NoSuchKey") || message.contains("NotFound") {
        StorageError::not_found(key)
    } else {
        StorageError::DownloadFailed(message)
    }
}

#[async_trait]
impl ArtifactStore for R2ArtifactStore {
    fn name(&self) -> &'static str {
        "r2"
    }

    async fn put(&self, key: &ArtifactKey, data: Vec<u8>, content_type: &str) -> StorageResult<StoredArtifact> {
        debug!("Uploading {} bytes to {}", data.len(), key);
        let digest = digest(&data);
        let size = data.len() as u64;

        self.upload(key, ByteStream::from(data), content_type).await?;

        Ok(StoredArtifact {
            artifact: key.to_ref(),
            digest,
            size,
        })
    }

    async fn put_file(&self, key: &ArtifactKey, path: &Path, content_type: &str) -> StorageResult<StoredArtifact> {
        let (digest, size) = digest_file(path).await?;
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.upload(key, body, content_type).await?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(StoredArtifact {
            artifact: key.to_ref(),
            digest,
            size,
        })
    }

    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let key = ArtifactKey::try_from(artifact)?;
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| map_get_error(key.as_str(), e.to_string()))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn fetch_to_path(&self, artifact: &ArtifactRef, path: &Path) -> StorageResult<()> {
        let bytes = self.get(artifact).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;

        info!("Downloaded {} to {}", artifact, path.display());
        Ok(())
    }

    async fn exists(&self, artifact: &ArtifactRef) -> StorageResult<bool> {
        let key = ArtifactKey::try_from(artifact)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match map_get_error(key.as_str(), e.to_string()) {
                StorageError::NotFound(_) => Ok(false),
                _ => Err(StorageError::AwsSdk(e.to_string())),
            },
        }
    }

    async fn url_for(&self, artifact: &ArtifactRef) -> StorageResult<String> {
        let key = ArtifactKey::try_from(artifact)?;
        let presign_config =
            PresigningConfig::expires_in(self.url_ttl).map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_error_mapping() {
        assert!(map_get_error("k", "service error: NoSuchKey".into()).is_not_found());
        assert!(matches!(
            map_get_error("k", "dispatch failure".into()),
            StorageError::DownloadFailed(_)
        ));
    }
}
