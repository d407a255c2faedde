//! Media acquisition and FFmpeg plumbing.
//!
//! This crate provides:
//! - Per-platform fetchers (yt-dlp, direct HTTP) behind a lookup table
//! - Audio extraction to 16 kHz mono WAV for transcription
//! - Frame sampling for visual detection
//! - FFprobe stream inspection

pub mod audio;
pub mod command;
pub mod error;
pub mod fetch;
pub mod frames;
pub mod probe;

pub use audio::{extract_audio, TRANSCRIPTION_SAMPLE_RATE};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use error::{is_transient_status, MediaError, MediaResult};
pub use fetch::{
    classify_ytdlp_failure, FetchedMedia, FetcherRegistry, HttpFetcher, HttpFetcherConfig, PlatformFetcher,
    YtDlpConfig, YtDlpFetcher,
};
pub use frames::{sample_frames, SampledFrame};
pub use probe::{probe_media, MediaInfo};
