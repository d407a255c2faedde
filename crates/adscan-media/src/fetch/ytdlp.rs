//! Video platform downloads using yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{FetchedMedia, PlatformFetcher};
use crate::command::stderr_tail;
use crate::error::{MediaError, MediaResult};

const OUTPUT_STEM: &str = "media";

/// yt-dlp settings.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Format selector
    pub format: String,
    /// Netscape cookies file for platforms that require a session
    pub cookies_path: Option<PathBuf>,
    /// Largest accepted file
    pub max_filesize_mb: u64,
    pub socket_timeout: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            format: "best[height<=720][ext=mp4]/best[height<=720]/best".to_string(),
            cookies_path: None,
            max_filesize_mb: 2048,
            socket_timeout: Duration::from_secs(30),
        }
    }
}

impl YtDlpConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: std::env::var("YTDLP_FORMAT").unwrap_or(defaults.format),
            cookies_path: std::env::var("YTDLP_COOKIES_PATH").ok().map(PathBuf::from),
            max_filesize_mb: std::env::var("YTDLP_MAX_FILESIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_filesize_mb),
            socket_timeout: defaults.socket_timeout,
        }
    }
}

/// Fetches from YouTube, VK, Rutube, Twitch and Telegram through yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: YtDlpConfig,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub fn build_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        let template = dest_dir.join(format!("{OUTPUT_STEM}.%(ext)s"));
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-part".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout.as_secs().to_string(),
            "--max-filesize".to_string(),
            format!("{}M", self.config.max_filesize_mb),
            "-f".to_string(),
            self.config.format.clone(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
        ];
        if let Some(cookies) = &self.config.cookies_path {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }
        // End of options: the URL is never parsed as a flag.
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }
}

/// Map yt-dlp stderr to a permanent or transient error.
pub fn classify_ytdlp_failure(stderr: &str) -> MediaError {
    let msg = stderr.to_lowercase();
    let summary = stderr_tail(stderr).unwrap_or_else(|| "yt-dlp failed".to_string());

    const PERMANENT: &[&str] = &[
        "private video",
        "video is private",
        "video unavailable",
        "video is unavailable",
        "video not available",
        "has been removed",
        "was deleted",
        "not available in your country",
        "blocked in your country",
        "geo restricted",
        "unsupported url",
        "http error 404",
        "http error 410",
        "members-only",
        "this live event will begin",
    ];

    if PERMANENT.iter().any(|p| msg.contains(p))
        || (msg.contains("copyright") && msg.contains("block"))
        || (msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")))
    {
        return MediaError::unavailable(summary);
    }

    if msg.contains("429") || msg.contains("too many requests") {
        warn!("yt-dlp rate limited");
    }
    MediaError::download_failed(summary)
}

async fn find_output(dest_dir: &Path) -> MediaResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_output = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s == OUTPUT_STEM)
            .unwrap_or(false);
        if is_output && entry.file_type().await?.is_file() {
            return Ok(path);
        }
    }
    Err(MediaError::download_failed("yt-dlp produced no output file"))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl PlatformFetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<FetchedMedia> {
        which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;
        tokio::fs::create_dir_all(dest_dir).await?;

        info!(url = %url, "Downloading with yt-dlp");
        let output = Command::new("yt-dlp")
            .args(self.build_args(url, dest_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            return Err(classify_ytdlp_failure(&stderr));
        }

        let path = find_output(dest_dir).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        if size == 0 {
            return Err(MediaError::download_failed("yt-dlp produced an empty file"));
        }

        info!(
            output = %path.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Downloaded media"
        );

        Ok(FetchedMedia {
            content_type: content_type_for(&path).to_string(),
            path,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_ends_with_url() {
        let fetcher = YtDlpFetcher::new(YtDlpConfig {
            cookies_path: Some(PathBuf::from("/secrets/cookies.txt")),
            ..YtDlpConfig::default()
        });
        let args = fetcher.build_args("https://youtu.be/abc", Path::new("/work/j1"));

        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
        assert!(args.contains(&"/work/j1/media.%(ext)s".to_string()));
        assert!(args.contains(&"/secrets/cookies.txt".to_string()));
    }

    #[test]
    fn test_classify_permanent_failures() {
        for stderr in [
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access",
            "ERROR: [youtube] abc: Video unavailable. This video has been removed by the uploader",
            "ERROR: The uploader has not made this video available in your country; not available in your country",
            "ERROR: Unsupported URL: https://example.com/",
            "ERROR: [youtube] abc: Sign in to confirm your age. This video may be inappropriate; age-restricted",
        ] {
            assert!(classify_ytdlp_failure(stderr).is_permanent(), "{stderr}");
        }
    }

    #[test]
    fn test_classify_transient_failures() {
        for stderr in [
            "ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests",
            "ERROR: unable to download video data: <urlopen error [Errno 104] Connection reset by peer>",
            "",
        ] {
            assert!(!classify_ytdlp_failure(stderr).is_permanent(), "{stderr}");
        }
    }

    #[tokio::test]
    async fn test_find_output_picks_media_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("other.txt"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("media.webm"), b"video").await.unwrap();

        let path = find_output(dir.path()).await.unwrap();
        assert!(path.ends_with("media.webm"));
        assert_eq!(content_type_for(&path), "video/webm");
    }
}
