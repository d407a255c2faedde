//! The artifact store contract and backend selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use adscan_models::ArtifactRef;

use crate::client::{R2ArtifactStore, R2Config};
use crate::error::{StorageError, StorageResult};
use crate::key::{digest, ArtifactKey, StoredArtifact};
use crate::local::LocalArtifactStore;

/// Blob storage for media, stage outputs and reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn put(&self, key: &ArtifactKey, data: Vec<u8>, content_type: &str) -> StorageResult<StoredArtifact>;

    async fn put_file(&self, key: &ArtifactKey, path: &Path, content_type: &str) -> StorageResult<StoredArtifact>;

    /// Object bytes, or [`StorageError::NotFound`].
    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>>;

    /// Copy an object to a local path, creating parent directories.
    async fn fetch_to_path(&self, artifact: &ArtifactRef, path: &Path) -> StorageResult<()>;

    async fn exists(&self, artifact: &ArtifactRef) -> StorageResult<bool>;

    /// A URL a client can retrieve the object from.
    async fn url_for(&self, artifact: &ArtifactRef) -> StorageResult<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Serialize `value` as pretty JSON and store it.
pub async fn put_json<T: Serialize + ?Sized + Sync>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    value: &T,
) -> StorageResult<StoredArtifact> {
    let data = serde_json::to_vec_pretty(value)?;
    store.put(key, data, "application/json").await
}

/// Load a JSON artifact, rejecting it if its digest differs from `expected_digest`.
pub async fn get_json_verified<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    artifact: &ArtifactRef,
    expected_digest: &str,
) -> StorageResult<T> {
    let data = store.get(artifact).await?;
    let actual = digest(&data);
    if actual != expected_digest {
        return Err(StorageError::DigestMismatch {
            artifact: artifact.to_string(),
            expected: expected_digest.to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&data)?)
}

/// Which backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBackend {
    Local { root: PathBuf },
    R2,
}

/// Artifact store configuration.
#[derive(Debug, Clone)]
pub struct ArtifactStoreConfig {
    pub backend: ArtifactBackend,
    /// Lifetime of presigned result URLs
    pub url_ttl: Duration,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            backend: ArtifactBackend::Local {
                root: PathBuf::from("./data/artifacts"),
            },
            url_ttl: Duration::from_secs(86400),
        }
    }
}

impl ArtifactStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("ARTIFACT_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => ArtifactBackend::Local {
                root: PathBuf::from(
                    std::env::var("ARTIFACT_LOCAL_ROOT").unwrap_or_else(|_| "./data/artifacts".to_string()),
                ),
            },
            "r2" | "s3" => ArtifactBackend::R2,
            other => {
                return Err(StorageError::config_error(format!(
                    "ARTIFACT_BACKEND must be local or r2, got {other}"
                )))
            }
        };

        Ok(Self {
            backend,
            url_ttl: Duration::from_secs(
                std::env::var("ARTIFACT_URL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86400),
            ),
        })
    }
}

/// Build the configured backend.
pub async fn connect(config: ArtifactStoreConfig) -> StorageResult<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.backend {
        ArtifactBackend::Local { root } => Arc::new(LocalArtifactStore::new(root).await?),
        ArtifactBackend::R2 => Arc::new(R2ArtifactStore::new(R2Config::from_env()?, config.url_ttl).await?),
    };
    info!("Artifact store: {}", store.name());
    Ok(store)
}
