//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media fetching and processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed { message: String, stderr: Option<String> },

    /// Download failed in a way that may succeed later.
    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    /// The media is private, removed, geo-blocked or otherwise gone for good.
    #[error("Media unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Media exceeds size limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(message: impl Into<String>, stderr: Option<String>, exit_code: Option<i32>) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    /// Retrying cannot help.
    ///
    /// Missing tools count as permanent: the worker is misconfigured and the
    /// selfcheck binary reports it.
    pub fn is_permanent(&self) -> bool {
        match self {
            MediaError::Unavailable { .. }
            | MediaError::UnsupportedSource(_)
            | MediaError::TooLarge { .. }
            | MediaError::InvalidMedia(_)
            | MediaError::FileNotFound(_)
            | MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound
            | MediaError::YtDlpNotFound
            | MediaError::JsonParse(_) => true,
            MediaError::HttpStatus { status, .. } => !is_transient_status(*status),
            MediaError::Http(e) => e.status().map(|s| !is_transient_status(s.as_u16())).unwrap_or(false),
            MediaError::FfmpegFailed { .. } | MediaError::FfprobeFailed { .. } => true,
            MediaError::DownloadFailed { .. } | MediaError::Timeout(_) | MediaError::Io(_) => false,
        }
    }
}

/// 408, 429 and 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}
