//! Per-platform media fetchers.
//!
//! Each URL platform maps to one [`PlatformFetcher`] in a [`FetcherRegistry`].
//! Adding a platform means registering another entry, not branching in the
//! download stage.

mod http;
mod ytdlp;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use adscan_models::Platform;

use crate::error::{MediaError, MediaResult};

pub use http::{HttpFetcher, HttpFetcherConfig};
pub use ytdlp::{classify_ytdlp_failure, YtDlpConfig, YtDlpFetcher};

/// A fetched media file on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
}

/// Downloads media for one or more platforms.
#[async_trait]
pub trait PlatformFetcher: Send + Sync {
    /// Fetcher name for logging.
    fn name(&self) -> &'static str;

    /// Download `url` into `dest_dir`.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<FetchedMedia>;
}

/// Lookup table from platform to fetcher.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<Platform, Arc<dyn PlatformFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// yt-dlp for video platforms, plain HTTP for generic URLs.
    pub fn with_defaults(ytdlp: YtDlpConfig, http: HttpFetcherConfig) -> MediaResult<Self> {
        let ytdlp: Arc<dyn PlatformFetcher> = Arc::new(YtDlpFetcher::new(ytdlp));
        let http: Arc<dyn PlatformFetcher> = Arc::new(HttpFetcher::new(http)?);

        let mut registry = Self::new();
        for platform in [
            Platform::Youtube,
            Platform::Telegram,
            Platform::Vk,
            Platform::Rutube,
            Platform::Twitch,
        ] {
            registry.register(platform, Arc::clone(&ytdlp));
        }
        registry.register(Platform::GenericUrl, http);
        Ok(registry)
    }

    pub fn register(&mut self, platform: Platform, fetcher: Arc<dyn PlatformFetcher>) -> &mut Self {
        self.fetchers.insert(platform, fetcher);
        self
    }

    pub fn get(&self, platform: Platform) -> MediaResult<Arc<dyn PlatformFetcher>> {
        self.fetchers
            .get(&platform)
            .cloned()
            .ok_or_else(|| MediaError::UnsupportedSource(format!("no fetcher registered for {platform}")))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.fetchers.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_url_platforms() {
        let registry = FetcherRegistry::with_defaults(YtDlpConfig::default(), HttpFetcherConfig::default()).unwrap();

        for platform in Platform::ALL.iter().filter(|p| p.is_url_based()) {
            assert!(registry.get(*platform).is_ok(), "{platform} should have a fetcher");
        }
        assert_eq!(registry.get(Platform::Youtube).unwrap().name(), "yt-dlp");
        assert_eq!(registry.get(Platform::GenericUrl).unwrap().name(), "http");

        let err = registry.get(Platform::FileUpload).err().unwrap();
        assert!(err.is_permanent());
    }
}
