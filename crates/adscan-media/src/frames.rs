//! Frame sampling for visual detection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXT: &str = "jpg";

/// One sampled still.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledFrame {
    /// Zero-based sample index
    pub index: usize,
    /// Position in the media, in seconds
    pub timestamp: f64,
    pub path: PathBuf,
}

/// Build the command writing one JPEG every `interval_secs`, at most `max_frames`.
pub fn sample_frames_command(input: &Path, out_dir: &Path, interval_secs: f64, max_frames: usize) -> FfmpegCommand {
    FfmpegCommand::new(input, out_dir.join(format!("{FRAME_PREFIX}%05d.{FRAME_EXT}")))
        .no_audio()
        .video_filter(format!("fps=1/{interval_secs}"))
        .output_args(["-frames:v".to_string(), max_frames.to_string(), "-q:v".to_string(), "3".to_string()])
}

/// Sample frames from `input` into `out_dir`, ordered by timestamp.
pub async fn sample_frames(
    runner: &FfmpegRunner,
    input: &Path,
    out_dir: &Path,
    interval_secs: f64,
    max_frames: usize,
) -> MediaResult<Vec<SampledFrame>> {
    if !(interval_secs.is_finite() && interval_secs > 0.0) || max_frames == 0 {
        return Err(MediaError::InvalidMedia(format!(
            "invalid sampling: interval {interval_secs}s, max {max_frames} frames"
        )));
    }

    tokio::fs::create_dir_all(out_dir).await?;
    runner
        .run(&sample_frames_command(input, out_dir, interval_secs, max_frames))
        .await?;

    let frames = collect_frames(out_dir, interval_secs, max_frames).await?;
    info!(count = frames.len(), interval_secs, "Sampled frames");
    Ok(frames)
}

/// List frames written by [`sample_frames_command`].
pub async fn collect_frames(out_dir: &Path, interval_secs: f64, max_frames: usize) -> MediaResult<Vec<SampledFrame>> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let number = name
            .strip_prefix(FRAME_PREFIX)
            .and_then(|rest| rest.strip_suffix(&format!(".{FRAME_EXT}")))
            .and_then(|n| n.parse::<usize>().ok());
        match number {
            // ffmpeg numbers output images from 1.
            Some(n) if n >= 1 => numbered.push((n, entry.path())),
            _ => debug!("Skipping non-frame file {}", name),
        }
    }

    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered
        .into_iter()
        .take(max_frames)
        .map(|(n, path)| SampledFrame {
            index: n - 1,
            timestamp: (n - 1) as f64 * interval_secs,
            path,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_frames_args() {
        let args = sample_frames_command(Path::new("m.mp4"), Path::new("/tmp/f"), 2.0, 30).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-vf fps=1/2"));
        assert!(joined.contains("-frames:v 30"));
        assert!(joined.ends_with("/tmp/f/frame_%05d.jpg"));
    }

    #[tokio::test]
    async fn test_collect_frames_orders_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_00003.jpg", "frame_00001.jpg", "frame_00002.jpg", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let frames = collect_frames(dir.path(), 5.0, 2).await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].index, 0);
        assert_eq!(frames[1].timestamp, 5.0);
        assert!(frames[1].path.ends_with("frame_00002.jpg"));
    }

    #[tokio::test]
    async fn test_invalid_sampling_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = sample_frames(&FfmpegRunner::new(), Path::new("m.mp4"), dir.path(), 0.0, 10)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
