//! Transcription adapter backed by the ML service.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use adscan_media::{extract_audio, probe_media, FfmpegRunner};
use adscan_ml_client::{MlClient, TranscriptSegment};
use adscan_models::clamp_unit;

use super::{TranscriptOutput, Transcriber};
use crate::error::StageResult;

/// Spoken calls to action, matched against lowercased segment text.
const CTA_PHRASES: &[&str] = &[
    "промокод",
    "по ссылке",
    "ссылка в описании",
    "ссылку в описании",
    "переходите",
    "переходи",
    "скидк",
    "заказывайте",
    "закажи",
    "используйте",
    "успейте",
    "купить",
    "link in the description",
    "link in bio",
    "use code",
    "promo code",
    "discount",
    "sign up",
    "check out",
    "buy now",
    "sponsored by",
];

/// Fraction of segments containing a call to action.
pub fn cta_score(segments: &[TranscriptSegment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }
    let hits = segments
        .iter()
        .filter(|segment| {
            let text = segment.text.to_lowercase();
            CTA_PHRASES.iter().any(|phrase| text.contains(phrase))
        })
        .count();
    clamp_unit(hits as f64 / segments.len() as f64)
}

pub struct MlTranscriber {
    ml: MlClient,
    runner: FfmpegRunner,
}

impl MlTranscriber {
    pub fn new(ml: MlClient, runner: FfmpegRunner) -> Self {
        Self { ml, runner }
    }
}

#[async_trait]
impl Transcriber for MlTranscriber {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> StageResult<TranscriptOutput> {
        let info = probe_media(media).await?;
        if !info.has_audio {
            debug!(media = %media.display(), "No audio stream, empty transcript");
            return Ok(TranscriptOutput::empty());
        }

        tokio::fs::create_dir_all(work_dir).await?;
        let wav = work_dir.join("audio.wav");
        extract_audio(&self.runner, media, &wav).await?;
        let audio = tokio::fs::read(&wav).await?;

        let transcription = self.ml.transcribe(audio, "audio.wav").await?;
        let audio_score = match transcription.ad_likelihood {
            Some(likelihood) => clamp_unit(likelihood),
            None => cta_score(&transcription.segments),
        };

        info!(
            segments = transcription.segments.len(),
            language = transcription.language.as_deref().unwrap_or("unknown"),
            audio_score,
            "Transcribed audio"
        );

        Ok(TranscriptOutput {
            text: transcription.text,
            segments: transcription.segments,
            language: transcription.language,
            audio_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_cta_score_counts_segments() {
        let segments = vec![
            segment("Всем привет, сегодня обзор"),
            segment("Используйте ПРОМОКОД blog10"),
            segment("Ссылка в описании"),
            segment("Пока!"),
        ];
        assert!((cta_score(&segments) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cta_score_empty() {
        assert_eq!(cta_score(&[]), 0.0);
        assert_eq!(cta_score(&[segment("just talking")]), 0.0);
    }
}
