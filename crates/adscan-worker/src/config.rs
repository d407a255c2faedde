//! Worker configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use adscan_models::StageName;

use crate::analyzers::ScoreWeights;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Pause between polls when the queue is empty
    pub poll_interval: Duration,
    /// Interval for renewing the lease of a running job
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/adscan"),
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/adscan")),
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WORKER_JOB_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// A lease must be renewed well before other workers consider it orphaned.
    pub fn validate(&self, liveness_timeout: Duration) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(WorkerError::config_error("heartbeat interval must be positive"));
        }
        if self.heartbeat_interval >= liveness_timeout {
            return Err(WorkerError::config_error(format!(
                "heartbeat interval {:?} must be shorter than liveness timeout {:?}",
                self.heartbeat_interval, liveness_timeout
            )));
        }
        Ok(())
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts and backoff per stage
    pub retry: RetryPolicy,
    /// Budget of one attempt unless overridden per stage
    pub stage_timeout: Duration,
    pub stage_timeouts: HashMap<StageName, Duration>,
    /// Seconds between sampled frames
    pub frame_interval_secs: f64,
    pub max_frames: usize,
    /// Concurrent logo-detection requests per job
    pub visual_parallelism: usize,
    /// Distinct keyword hits that saturate the text score
    pub keyword_saturation: usize,
    /// One phrase per line; built-in lexicon when unset
    pub lexicon_path: Option<PathBuf>,
    /// `label<TAB>weight<TAB>regex` per line; built-in rules when unset
    pub disclosure_patterns_path: Option<PathBuf>,
    pub weights: ScoreWeights,
    /// Minimum confidence for `has_advertising`
    pub threshold: f64,
    pub disclosure_classifier_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut stage_timeouts = HashMap::new();
        stage_timeouts.insert(StageName::Download, Duration::from_secs(900));

        Self {
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(300),
            stage_timeouts,
            frame_interval_secs: 2.0,
            max_frames: 120,
            visual_parallelism: 4,
            keyword_saturation: 3,
            lexicon_path: None,
            disclosure_patterns_path: None,
            weights: ScoreWeights::default(),
            threshold: 0.4,
            disclosure_classifier_enabled: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// `PIPELINE_TIMEOUT_VISUAL_DETECT_SECS` and friends.
fn stage_timeout_var(stage: StageName) -> String {
    format!("PIPELINE_TIMEOUT_{}_SECS", stage.as_str().to_uppercase())
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut stage_timeouts = defaults.stage_timeouts.clone();
        for stage in StageName::ORDER {
            if let Some(secs) = env_parse::<u64>(&stage_timeout_var(stage)) {
                stage_timeouts.insert(stage, Duration::from_secs(secs));
            }
        }

        Self {
            retry: RetryPolicy {
                max_attempts: env_parse("PIPELINE_STAGE_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
                base_delay: env_parse("PIPELINE_BACKOFF_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: env_parse("PIPELINE_BACKOFF_CAP_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_delay),
            },
            stage_timeout: env_parse("PIPELINE_STAGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            stage_timeouts,
            frame_interval_secs: env_parse("FRAME_INTERVAL_SECS").unwrap_or(defaults.frame_interval_secs),
            max_frames: env_parse("MAX_FRAMES").unwrap_or(defaults.max_frames),
            visual_parallelism: env_parse("VISUAL_PARALLELISM").unwrap_or(defaults.visual_parallelism),
            keyword_saturation: env_parse("KEYWORD_SATURATION").unwrap_or(defaults.keyword_saturation),
            lexicon_path: std::env::var("KEYWORD_LEXICON_PATH").ok().map(PathBuf::from),
            disclosure_patterns_path: std::env::var("DISCLOSURE_PATTERNS_PATH").ok().map(PathBuf::from),
            weights: ScoreWeights {
                visual: env_parse("SCORE_WEIGHT_VISUAL").unwrap_or(defaults.weights.visual),
                audio: env_parse("SCORE_WEIGHT_AUDIO").unwrap_or(defaults.weights.audio),
                text: env_parse("SCORE_WEIGHT_TEXT").unwrap_or(defaults.weights.text),
                disclosure: env_parse("SCORE_WEIGHT_DISCLOSURE").unwrap_or(defaults.weights.disclosure),
            },
            threshold: env_parse("AD_THRESHOLD").unwrap_or(defaults.threshold),
            disclosure_classifier_enabled: std::env::var("DISCLOSURE_CLASSIFIER_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Per-attempt budget of `stage`.
    pub fn timeout_for(&self, stage: StageName) -> Duration {
        self.stage_timeouts.get(&stage).copied().unwrap_or(self.stage_timeout)
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(WorkerError::config_error("stage max attempts must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(WorkerError::config_error("backoff base must not exceed backoff cap"));
        }
        self.weights.validate().map_err(WorkerError::ConfigError)?;
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(WorkerError::config_error(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(self.frame_interval_secs.is_finite() && self.frame_interval_secs > 0.0) {
            return Err(WorkerError::config_error("frame interval must be positive"));
        }
        if self.max_frames == 0 {
            return Err(WorkerError::config_error("max frames must be at least 1"));
        }
        if self.visual_parallelism == 0 || self.keyword_saturation == 0 {
            return Err(WorkerError::config_error(
                "visual parallelism and keyword saturation must be at least 1",
            ));
        }
        if let Some((stage, _)) = StageName::ORDER
            .iter()
            .map(|s| (s, self.timeout_for(*s)))
            .find(|(_, t)| t.is_zero())
        {
            return Err(WorkerError::config_error(format!("{stage} timeout must be positive")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeout_for(StageName::Download), Duration::from_secs(900));
        assert_eq!(config.timeout_for(StageName::Transcribe), Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_pipeline_validation_rejects_bad_values() {
        let cases: Vec<(&str, PipelineConfig)> = vec![
            (
                "zero attempts",
                PipelineConfig {
                    retry: RetryPolicy {
                        max_attempts: 0,
                        ..RetryPolicy::default()
                    },
                    ..PipelineConfig::default()
                },
            ),
            (
                "threshold above one",
                PipelineConfig {
                    threshold: 1.5,
                    ..PipelineConfig::default()
                },
            ),
            (
                "nan threshold",
                PipelineConfig {
                    threshold: f64::NAN,
                    ..PipelineConfig::default()
                },
            ),
            (
                "zero frame interval",
                PipelineConfig {
                    frame_interval_secs: 0.0,
                    ..PipelineConfig::default()
                },
            ),
            (
                "zero max frames",
                PipelineConfig {
                    max_frames: 0,
                    ..PipelineConfig::default()
                },
            ),
            (
                "all-zero weights",
                PipelineConfig {
                    weights: ScoreWeights {
                        visual: 0.0,
                        audio: 0.0,
                        text: 0.0,
                        disclosure: 0.0,
                    },
                    ..PipelineConfig::default()
                },
            ),
        ];

        for (name, config) in cases {
            assert!(config.validate().is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn test_zero_stage_override_is_rejected() {
        let mut config = PipelineConfig::default();
        config.stage_timeouts.insert(StageName::Aggregate, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_beat_liveness() {
        let config = WorkerConfig::default();
        assert!(config.validate(Duration::from_secs(120)).is_ok());
        assert!(config.validate(Duration::from_secs(30)).is_err());
        assert!(config.validate(Duration::from_secs(10)).is_err());
    }

    #[test]
    fn test_stage_timeout_var_names() {
        assert_eq!(stage_timeout_var(StageName::Download), "PIPELINE_TIMEOUT_DOWNLOAD_SECS");
        assert_eq!(
            stage_timeout_var(StageName::VisualDetect),
            "PIPELINE_TIMEOUT_VISUAL_DETECT_SECS"
        );
    }
}
