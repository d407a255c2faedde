//! Analyzer adapters: one capability per pipeline stage.
//!
//! Adapters are injected into the coordinator and never retry on their own.
//! Each reports [`StageError::Transient`](crate::error::StageError) or
//! [`StageError::Permanent`](crate::error::StageError) and the coordinator
//! applies the retry policy.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use adscan_media::{FetchedMedia, FetcherRegistry, FfmpegRunner};
use adscan_ml_client::{MlClient, TranscriptSegment};
use adscan_models::{AnalysisResult, ArtifactRef, DetectedBrand, Job, StageName};
use adscan_storage::ArtifactStore;

use crate::config::PipelineConfig;
use crate::error::{StageResult, WorkerResult};

pub mod aggregate;
pub mod disclosure;
pub mod download;
pub mod keywords;
pub mod report;
pub mod transcribe;
pub mod visual;

pub use aggregate::{AggregateOutput, ScoreAggregator, ScoreWeights, WeightedAggregator};
pub use disclosure::{
    CompositeDisclosureDetector, DisclosureClassifier, DisclosureRule, DisclosureRules, MlDisclosureClassifier,
};
pub use download::MediaDownloader;
pub use keywords::LexiconMatcher;
pub use report::HtmlReportRenderer;
pub use transcribe::{cta_score, MlTranscriber};
pub use visual::{summarize_visual, visual_score, MlVisualDetector};

/// Output of the Download stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutput {
    /// Job copy of the media in the artifact store
    pub media: ArtifactRef,
    /// Name of the local file the media is restored to
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Output of the Transcribe stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptOutput {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub audio_score: f64,
}

impl TranscriptOutput {
    /// Media without an audio stream.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Output of the VisualDetect stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisualOutput {
    pub brands: Vec<DetectedBrand>,
    pub frames_sampled: u32,
    pub frames_with_hits: u32,
    pub visual_score: f64,
}

/// Output of the KeywordDetect stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeywordOutput {
    pub keywords: BTreeSet<String>,
    pub text_score: f64,
}

/// Output of the DisclosureDetect stage, whichever detectors ran.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisclosureOutput {
    pub markers: BTreeSet<String>,
    pub rule_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_probability: Option<f64>,
    pub disclosure_score: f64,
}

/// Fetches the job's media into `dest_dir`.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, job: &Job, dest_dir: &Path) -> StageResult<FetchedMedia>;
}

/// Speech to text plus the audio ad score.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> StageResult<TranscriptOutput>;
}

/// Brand detection over sampled frames.
#[async_trait]
pub trait VisualDetector: Send + Sync {
    async fn detect(&self, media: &Path, work_dir: &Path) -> StageResult<VisualOutput>;
}

#[async_trait]
pub trait KeywordMatcher: Send + Sync {
    async fn match_keywords(&self, transcript: &TranscriptOutput) -> StageResult<KeywordOutput>;
}

#[async_trait]
pub trait DisclosureDetector: Send + Sync {
    async fn detect(&self, transcript: &TranscriptOutput) -> StageResult<DisclosureOutput>;
}

/// Renders the human-readable report.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, result: &AnalysisResult) -> StageResult<String>;
}

/// The adapter set a coordinator runs with.
#[derive(Clone)]
pub struct Adapters {
    pub downloader: Arc<dyn Downloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub visual: Arc<dyn VisualDetector>,
    pub keywords: Arc<dyn KeywordMatcher>,
    pub disclosure: Arc<dyn DisclosureDetector>,
    pub aggregator: Arc<dyn ScoreAggregator>,
    pub renderer: Arc<dyn ReportRenderer>,
}

impl Adapters {
    /// Adapters backed by the platform fetchers, FFmpeg and the ML service.
    pub async fn production(
        config: &PipelineConfig,
        fetchers: FetcherRegistry,
        artifacts: Arc<dyn ArtifactStore>,
        ml: MlClient,
    ) -> WorkerResult<Self> {
        let runner = FfmpegRunner::new().with_timeout(
            config
                .timeout_for(StageName::Transcribe)
                .min(config.timeout_for(StageName::VisualDetect)),
        );

        let keywords = match &config.lexicon_path {
            Some(path) => LexiconMatcher::from_file(path, config.keyword_saturation).await?,
            None => LexiconMatcher::with_defaults(config.keyword_saturation)?,
        };

        let classifier: Option<Arc<dyn DisclosureClassifier>> = if config.disclosure_classifier_enabled {
            Some(Arc::new(MlDisclosureClassifier::new(ml.clone())))
        } else {
            None
        };

        let rules = match &config.disclosure_patterns_path {
            Some(path) => DisclosureRules::from_file(path).await?,
            None => DisclosureRules::defaults()?,
        };
        let rule_count = rules.len();

        let disclosure = CompositeDisclosureDetector::new(rules, classifier);
        info!(
            "Pipeline adapters ready: {} lexicon entries, {} disclosure rules, disclosure classifier {}",
            keywords.len(),
            rule_count,
            if disclosure.has_classifier() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            downloader: Arc::new(MediaDownloader::new(fetchers, artifacts)),
            transcriber: Arc::new(MlTranscriber::new(ml.clone(), runner.clone())),
            visual: Arc::new(MlVisualDetector::new(
                ml,
                runner,
                config.frame_interval_secs,
                config.max_frames,
                config.visual_parallelism,
            )),
            keywords: Arc::new(keywords),
            disclosure: Arc::new(disclosure),
            aggregator: Arc::new(WeightedAggregator::new(config.weights, config.threshold)),
            renderer: Arc::new(HtmlReportRenderer::new()),
        })
    }
}
