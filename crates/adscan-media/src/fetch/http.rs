//! Direct HTTP downloads for generic media URLs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{FetchedMedia, PlatformFetcher};
use crate::error::{is_transient_status, MediaError, MediaResult};

/// HTTP fetcher settings.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Largest accepted body
    pub max_bytes: u64,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            max_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Streams a URL body to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

#[async_trait]
impl PlatformFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<FetchedMedia> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                MediaError::UnsupportedSource(e.to_string())
            } else {
                MediaError::download_failed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(if is_transient_status(status) {
                MediaError::HttpStatus {
                    status,
                    url: url.to_string(),
                }
            } else {
                MediaError::unavailable(format!("HTTP {status} fetching {url}"))
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.config.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.config.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if content_type.starts_with("text/html") {
            return Err(MediaError::UnsupportedSource(format!("{url} serves a web page, not media")));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("media.{}", extension_for(&content_type)));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut size = 0u64;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| MediaError::download_failed(e.to_string()))?;
            size += chunk.len() as u64;
            if size > self.config.max_bytes {
                drop(file);
                tokio::fs::remove_file(&path).await.ok();
                return Err(MediaError::TooLarge {
                    limit: self.config.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if size == 0 {
            return Err(MediaError::InvalidMedia(format!("{url} returned an empty body")));
        }

        info!(url = %url, size_bytes = size, "Downloaded media over HTTP");
        Ok(FetchedMedia {
            path,
            content_type,
            size,
        })
    }
}
