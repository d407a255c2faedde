//! Visual brand detection: sample frames, run logo detection on each.

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use adscan_media::{probe_media, sample_frames, FfmpegRunner, SampledFrame};
use adscan_ml_client::MlClient;
use adscan_models::{clamp_unit, merge_brands, DetectedBrand};

use super::{VisualDetector, VisualOutput};
use crate::error::{StageError, StageResult};

/// `0.7 * strongest hit + 0.3 * share of frames with any hit`.
pub fn visual_score(max_confidence: f64, frames_with_hits: u32, frames_sampled: u32) -> f64 {
    if frames_sampled == 0 || frames_with_hits == 0 {
        return 0.0;
    }
    let coverage = frames_with_hits as f64 / frames_sampled as f64;
    clamp_unit(0.7 * clamp_unit(max_confidence) + 0.3 * coverage)
}

/// Fold per-frame hits into the stage output.
pub fn summarize_visual(per_frame: Vec<Vec<DetectedBrand>>, frames_sampled: u32) -> VisualOutput {
    let frames_with_hits = per_frame.iter().filter(|hits| !hits.is_empty()).count() as u32;
    let brands = merge_brands(per_frame.into_iter().flatten());
    let max_confidence = brands.iter().map(|b| b.confidence).fold(0.0, f64::max);

    VisualOutput {
        visual_score: visual_score(max_confidence, frames_with_hits, frames_sampled),
        brands,
        frames_sampled,
        frames_with_hits,
    }
}

/// Run `detect` on up to `parallelism` frames at once. Results come back in frame order
/// whatever order the requests finish in.
pub async fn detect_in_frame_order<F, Fut>(
    frames: Vec<SampledFrame>,
    parallelism: usize,
    detect: F,
) -> Vec<StageResult<Vec<DetectedBrand>>>
where
    F: FnMut(SampledFrame) -> Fut,
    Fut: Future<Output = StageResult<Vec<DetectedBrand>>>,
{
    stream::iter(frames)
        .map(detect)
        .buffered(parallelism.max(1))
        .collect()
        .await
}

pub struct MlVisualDetector {
    ml: MlClient,
    runner: FfmpegRunner,
    frame_interval_secs: f64,
    max_frames: usize,
    parallelism: usize,
}

impl MlVisualDetector {
    pub fn new(ml: MlClient, runner: FfmpegRunner, frame_interval_secs: f64, max_frames: usize, parallelism: usize) -> Self {
        Self {
            ml,
            runner,
            frame_interval_secs,
            max_frames,
            parallelism: parallelism.max(1),
        }
    }

    async fn detect_frame(&self, frame: SampledFrame) -> StageResult<Vec<DetectedBrand>> {
        let image = tokio::fs::read(&frame.path).await?;
        let hits = self.ml.detect_logos(image, frame.timestamp).await?;
        Ok(hits
            .into_iter()
            .map(|hit| DetectedBrand::new(hit.brand, hit.confidence, frame.timestamp))
            .collect())
    }
}

#[async_trait]
impl VisualDetector for MlVisualDetector {
    async fn detect(&self, media: &Path, work_dir: &Path) -> StageResult<VisualOutput> {
        let info = probe_media(media).await?;
        if !info.has_video {
            debug!(media = %media.display(), "No video stream, skipping logo detection");
            return Ok(VisualOutput::default());
        }

        let frames_dir = work_dir.join("frames");
        if tokio::fs::try_exists(&frames_dir).await? {
            tokio::fs::remove_dir_all(&frames_dir).await?;
        }
        let frames = sample_frames(
            &self.runner,
            media,
            &frames_dir,
            self.frame_interval_secs,
            self.max_frames,
        )
        .await?;
        let frames_sampled = frames.len() as u32;

        let results = detect_in_frame_order(frames, self.parallelism, |frame| self.detect_frame(frame)).await;

        let mut per_frame = Vec::with_capacity(results.len());
        let mut first_transient: Option<StageError> = None;
        for result in results {
            match result {
                Ok(hits) => per_frame.push(hits),
                Err(e @ StageError::Permanent(_)) => return Err(e),
                Err(e) => {
                    first_transient.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_transient {
            return Err(e);
        }

        let output = summarize_visual(per_frame, frames_sampled);
        info!(
            frames = frames_sampled,
            frames_with_hits = output.frames_with_hits,
            brands = output.brands.len(),
            visual_score = output.visual_score,
            "Logo detection finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn frame(index: usize) -> SampledFrame {
        SampledFrame {
            index,
            timestamp: index as f64 * 2.0,
            path: PathBuf::from(format!("frame_{index:04}.jpg")),
        }
    }

    #[test]
    fn test_visual_score_formula() {
        assert_eq!(visual_score(0.9, 0, 10), 0.0);
        assert_eq!(visual_score(0.9, 1, 0), 0.0);
        assert!((visual_score(0.9, 5, 10) - (0.63 + 0.15)).abs() < 1e-9);
        assert!((visual_score(1.0, 4, 4) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_merges_brands_across_frames() {
        let output = summarize_visual(
            vec![
                vec![DetectedBrand::new("Acme", 0.6, 0.0)],
                vec![],
                vec![DetectedBrand::new("ACME", 0.8, 4.0), DetectedBrand::new("Globex", 0.5, 4.0)],
                vec![],
            ],
            4,
        );

        assert_eq!(output.frames_with_hits, 2);
        assert_eq!(output.brands.len(), 2);
        assert_eq!(output.brands[0].name, "Acme");
        assert_eq!(output.brands[0].timestamps, vec![0.0, 4.0]);
        assert!((output.visual_score - (0.7 * 0.8 + 0.3 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_without_hits() {
        let output = summarize_visual(vec![vec![], vec![]], 2);
        assert!(output.brands.is_empty());
        assert_eq!(output.visual_score, 0.0);
    }

    #[tokio::test]
    async fn test_frame_results_keep_frame_order() {
        // Frame 0 answers last; its spelling and position must still win.
        let frames: Vec<SampledFrame> = (0..3).map(frame).collect();
        let results = detect_in_frame_order(frames, 3, |frame| async move {
            let (name, delay) = match frame.index {
                0 => ("Acme", 30),
                1 => ("Globex", 10),
                _ => ("ACME", 0),
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![DetectedBrand::new(name, 0.7, frame.timestamp)])
        })
        .await;

        let per_frame: Vec<Vec<DetectedBrand>> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(per_frame[0][0].name, "Acme");

        let output = summarize_visual(per_frame, 3);
        let names: Vec<&str> = output.brands.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Globex"]);
        assert_eq!(output.brands[0].timestamps, vec![0.0, 4.0]);
    }
}
