//! Download adapter: platform fetchers for URLs, the artifact store for uploads.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use adscan_media::{FetchedMedia, FetcherRegistry};
use adscan_models::{ArtifactRef, InputType, Job};
use adscan_storage::{ArtifactStore, StorageError};

use super::Downloader;
use crate::error::{StageError, StageResult};

pub struct MediaDownloader {
    fetchers: FetcherRegistry,
    artifacts: Arc<dyn ArtifactStore>,
}

impl MediaDownloader {
    pub fn new(fetchers: FetcherRegistry, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { fetchers, artifacts }
    }

    async fn fetch_upload(&self, source: &ArtifactRef, dest_dir: &Path) -> StageResult<FetchedMedia> {
        let extension = Path::new(source.as_str())
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        let path = dest_dir.join(format!("media.{extension}"));

        self.artifacts.fetch_to_path(source, &path).await.map_err(|e| match e {
            StorageError::NotFound(_) => StageError::permanent(format!("uploaded media {source} is missing")),
            other => StageError::from(other),
        })?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size == 0 {
            return Err(StageError::permanent(format!("uploaded media {source} is empty")));
        }

        Ok(FetchedMedia {
            content_type: content_type_for_extension(&extension).to_string(),
            path,
            size,
        })
    }
}

fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Downloader for MediaDownloader {
    async fn download(&self, job: &Job, dest_dir: &Path) -> StageResult<FetchedMedia> {
        tokio::fs::create_dir_all(dest_dir).await?;

        match job.input_type {
            InputType::Url => {
                let url = job
                    .input_url
                    .as_deref()
                    .ok_or_else(|| StageError::permanent("job has no input URL"))?;
                let fetcher = self.fetchers.get(job.platform)?;
                info!(job_id = %job.id, platform = %job.platform, fetcher = fetcher.name(), "Fetching media");
                Ok(fetcher.fetch(url, dest_dir).await?)
            }
            InputType::File => {
                let source = job
                    .media_path
                    .as_deref()
                    .map(ArtifactRef::new)
                    .ok_or_else(|| StageError::permanent("job has no uploaded media"))?;
                self.fetch_upload(&source, dest_dir).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adscan_models::{JobSpec, Platform};
    use adscan_storage::{ArtifactKey, LocalArtifactStore};
    use chrono::Utc;

    async fn downloader(root: &Path) -> (MediaDownloader, Arc<dyn ArtifactStore>) {
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(LocalArtifactStore::new(root).await.unwrap());
        (MediaDownloader::new(FetcherRegistry::new(), artifacts.clone()), artifacts)
    }

    #[tokio::test]
    async fn test_upload_is_copied_from_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let (downloader, artifacts) = downloader(root.path()).await;

        let key = ArtifactKey::upload("u1", "clip.MP4").unwrap();
        artifacts.put(&key, vec![1u8; 32], "video/mp4").await.unwrap();
        let job = Job::new(JobSpec::from_upload(key.as_str()).unwrap(), Utc::now());

        let media = downloader.download(&job, work.path()).await.unwrap();
        assert_eq!(media.size, 32);
        assert_eq!(media.content_type, "video/mp4");
        assert!(media.path.ends_with("media.mp4"));
    }

    #[tokio::test]
    async fn test_missing_upload_is_permanent() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let (downloader, _) = downloader(root.path()).await;

        let job = Job::new(JobSpec::from_upload("uploads/u2/gone.mp4").unwrap(), Utc::now());
        let err = downloader.download(&job, work.path()).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("missing"));
    }

    #[tokio::test]
    async fn test_platform_without_fetcher_is_permanent() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let (downloader, _) = downloader(root.path()).await;

        let spec = JobSpec::from_url("https://rutube.ru/video/abc/", Some(Platform::Rutube)).unwrap();
        let job = Job::new(spec, Utc::now());
        assert!(!downloader.download(&job, work.path()).await.unwrap_err().is_transient());
    }
}
