//! Local filesystem artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use adscan_models::ArtifactRef;

use crate::error::{StorageError, StorageResult};
use crate::key::{digest, digest_file, ArtifactKey, StoredArtifact};
use crate::store::ArtifactStore;

/// Stores objects as files under a root directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partial object.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        key.as_str().split('/').fold(self.root.clone(), |path, seg| path.join(seg))
    }

    fn resolve(&self, artifact: &ArtifactRef) -> StorageResult<PathBuf> {
        Ok(self.path_for(&ArtifactKey::try_from(artifact)?))
    }

    async fn staging_path(&self, target: &Path) -> StorageResult<PathBuf> {
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::invalid_key(target.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &ArtifactKey, data: Vec<u8>, _content_type: &str) -> StorageResult<StoredArtifact> {
        let target = self.path_for(key);
        let staging = self.staging_path(&target).await?;
        let digest = digest(&data);
        let size = data.len() as u64;

        tokio::fs::write(&staging, data).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!("Stored {} bytes at {}", size, key);
        Ok(StoredArtifact {
            artifact: key.to_ref(),
            digest,
            size,
        })
    }

    async fn put_file(&self, key: &ArtifactKey, path: &Path, _content_type: &str) -> StorageResult<StoredArtifact> {
        let target = self.path_for(key);
        let staging = self.staging_path(&target).await?;

        tokio::fs::copy(path, &staging).await?;
        let (digest, size) = digest_file(&staging).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!("Stored {} ({} bytes) at {}", path.display(), size, key);
        Ok(StoredArtifact {
            artifact: key.to_ref(),
            digest,
            size,
        })
    }

    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let path = self.resolve(artifact)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(artifact.as_str())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_to_path(&self, artifact: &ArtifactRef, path: &Path) -> StorageResult<()> {
        let source = self.resolve(artifact)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::not_found(artifact.as_str()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, path).await?;
        Ok(())
    }

    async fn exists(&self, artifact: &ArtifactRef) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.resolve(artifact)?).await?)
    }

    async fn url_for(&self, artifact: &ArtifactRef) -> StorageResult<String> {
        let path = self.resolve(artifact)?;
        url::Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::invalid_key(artifact.as_str()))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        tokio::fs::metadata(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{get_json_verified, put_json};
    use adscan_models::{JobId, StageName};

    #[tokio::test]
    async fn test_put_get_round_trip_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        let key = ArtifactKey::stage(&JobId::from_string("j1"), StageName::Transcribe, "output.json").unwrap();

        let stored = put_json(&store, &key, &vec!["промокод", "erid"]).await.unwrap();
        assert_eq!(stored.artifact.as_str(), "jobs/j1/transcribe/output.json");
        assert!(store.exists(&stored.artifact).await.unwrap());

        let back: Vec<String> = get_json_verified(&store, &stored.artifact, &stored.digest).await.unwrap();
        assert_eq!(back, vec!["промокод", "erid"]);

        let err = get_json_verified::<Vec<String>>(&store, &stored.artifact, "deadbeef").await.unwrap_err();
        assert!(matches!(err, StorageError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        let missing = ArtifactRef::new("jobs/x/download/media.mp4");

        assert!(store.get(&missing).await.unwrap_err().is_not_found());
        assert!(!store.exists(&missing).await.unwrap());
        let target = dir.path().join("out.mp4");
        assert!(store.fetch_to_path(&missing, &target).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_put_file_and_fetch_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store")).await.unwrap();
        let source = dir.path().join("clip.mp4");
        tokio::fs::write(&source, b"not really a video").await.unwrap();

        let key = ArtifactKey::upload("u1", "clip.mp4").unwrap();
        let stored = store.put_file(&key, &source, "video/mp4").await.unwrap();
        assert_eq!(stored.size, 18);
        assert_eq!(stored.digest, digest(b"not really a video"));

        let target = dir.path().join("work/nested/clip.mp4");
        store.fetch_to_path(&stored.artifact, &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"not really a video");

        let url = store.url_for(&stored.artifact).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("uploads/u1/clip.mp4"));
    }

    #[tokio::test]
    async fn test_traversal_ref_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        let err = store.get(&ArtifactRef::new("../secret")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
