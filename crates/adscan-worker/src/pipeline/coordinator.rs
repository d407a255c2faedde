use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn, Instrument};

use adscan_models::{
    AnalysisResult, ArtifactRef, ComponentScores, Expected, InputType, Job, JobId, JobStatus, JobUpdate,
    StageCheckpoint, StageName, StageOutcome,
};
use adscan_queue::ClaimedJob;
use adscan_storage::{get_json_verified, put_json, sanitize_file_name, ArtifactKey, ArtifactStore};
use adscan_store::{JobStore, StoreError};

use crate::analyzers::{
    Adapters, AggregateOutput, DisclosureOutput, DownloadOutput, KeywordOutput, TranscriptOutput, VisualOutput,
};
use crate::config::PipelineConfig;
use crate::error::{StageError, StageResult, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{run_with_retry, StageRun};

const OUTPUT_NAME: &str = "output.json";
const RESULT_NAME: &str = "result.json";
const REPORT_NAME: &str = "report.html";
const MEDIA_DIR: &str = "media";

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Job),
    Failed(Job),
    /// Another worker holds the lease now; nothing was written.
    Abandoned,
}

/// Runs claimed jobs through the analysis stages.
pub struct PipelineCoordinator {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    adapters: Adapters,
    config: PipelineConfig,
    work_dir: PathBuf,
}

/// Per-run state.
struct JobRun<'a> {
    claimed: &'a ClaimedJob,
    checkpoints: HashMap<StageName, StageCheckpoint>,
    /// Checkpoints of this stage and every later one are ignored.
    rerun_from: Option<StageName>,
    /// A previous owner recorded a permanent Download failure
    escalate_download_timeouts: bool,
    logger: JobLogger,
    dir: PathBuf,
}

impl JobRun<'_> {
    fn id(&self) -> &JobId {
        self.claimed.id()
    }

    fn job(&self) -> &Job {
        &self.claimed.job
    }

    fn trusts(&self, stage: StageName) -> bool {
        self.rerun_from.map_or(true, |from| stage < from)
    }

    fn rerun_from(&mut self, stage: StageName) {
        self.rerun_from = Some(self.rerun_from.map_or(stage, |from| from.min(stage)));
    }
}

/// Stale and NotFound on an owner-fenced write both mean the lease is gone.
fn fenced(e: StoreError, id: &JobId) -> WorkerError {
    if e.is_stale() || e.is_not_found() {
        WorkerError::LeaseLost(id.clone())
    } else {
        WorkerError::Store(e)
    }
}

impl PipelineCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        adapters: Adapters,
        config: PipelineConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            artifacts,
            adapters,
            config,
            work_dir: work_dir.into(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `claimed` to a terminal state.
    ///
    /// Stage failures end as [`PipelineOutcome::Failed`]; a lost lease ends
    /// as [`PipelineOutcome::Abandoned`]. `Err` means infrastructure trouble:
    /// the job stays `processing` and is reclaimed once its lease expires.
    pub async fn run(&self, claimed: &ClaimedJob) -> WorkerResult<PipelineOutcome> {
        let logger = JobLogger::new(claimed.id(), &claimed.owner);
        let span = logger.create_span();
        self.run_logged(claimed, logger).instrument(span).await
    }

    async fn run_logged(&self, claimed: &ClaimedJob, logger: JobLogger) -> WorkerResult<PipelineOutcome> {
        logger.log_start(if claimed.reclaimed {
            "resuming reclaimed job"
        } else {
            "starting analysis"
        });

        let dir = self.work_dir.join(claimed.id().as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let result = self.execute(claimed, logger.clone(), dir.clone()).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            debug!("Failed to clean up {}: {}", dir.display(), e);
        }

        match result {
            Ok(job) => {
                metrics::record_job_finished(JobStatus::Completed);
                logger.log_completion(job.result_path.as_deref().unwrap_or_default());
                Ok(PipelineOutcome::Completed(job))
            }
            Err(e) if e.is_terminal_for_job() => self.fail(claimed, &e, &logger).await,
            Err(WorkerError::LeaseLost(_)) => {
                logger.log_warning("lease lost, abandoning job");
                metrics::record_job_abandoned();
                Ok(PipelineOutcome::Abandoned)
            }
            Err(e) => Err(e),
        }
    }

    async fn fail(&self, claimed: &ClaimedJob, error: &WorkerError, logger: &JobLogger) -> WorkerResult<PipelineOutcome> {
        let message = error.to_string();
        logger.log_error(&message);

        match self
            .store
            .transition(
                claimed.id(),
                Expected::status(JobStatus::Processing).owned_by(claimed.owner.clone()),
                JobStatus::Failed,
                JobUpdate::fail(message),
            )
            .await
        {
            Ok(job) => {
                metrics::record_job_finished(JobStatus::Failed);
                Ok(PipelineOutcome::Failed(job))
            }
            Err(e) => match fenced(e, claimed.id()) {
                WorkerError::LeaseLost(_) => {
                    metrics::record_job_abandoned();
                    Ok(PipelineOutcome::Abandoned)
                }
                other => Err(other),
            },
        }
    }

    async fn execute(&self, claimed: &ClaimedJob, logger: JobLogger, dir: PathBuf) -> WorkerResult<Job> {
        let id = claimed.id();
        let checkpoints = self
            .store
            .checkpoints(id)
            .await?
            .into_iter()
            .map(|c| (c.stage, c))
            .collect();
        // A permanent Download failure ends the run that hit it, so one in the
        // ledger was left by a previous owner that died before marking the job
        // failed. Its successor treats further Download timeouts as permanent.
        let escalate_download_timeouts = self
            .store
            .attempts(id)
            .await?
            .iter()
            .any(|a| a.stage == StageName::Download && a.outcome == StageOutcome::PermanentFailure);

        let mut run = JobRun {
            claimed,
            checkpoints,
            rerun_from: None,
            escalate_download_timeouts,
            logger,
            dir,
        };

        let download = self.download_stage(&mut run).await?;
        self.record_media_path(&run, &download).await?;
        let media = self.local_media(&run, &download).await?;

        let transcriber = &self.adapters.transcriber;
        let transcribe_dir = run.dir.join(StageName::Transcribe.as_str());
        let transcript: TranscriptOutput = self
            .stage(&mut run, StageName::Transcribe, || transcriber.transcribe(&media, &transcribe_dir))
            .await?;

        let visual_detector = &self.adapters.visual;
        let visual_dir = run.dir.join(StageName::VisualDetect.as_str());
        let visual: VisualOutput = self
            .stage(&mut run, StageName::VisualDetect, || visual_detector.detect(&media, &visual_dir))
            .await?;

        let matcher = &self.adapters.keywords;
        let keywords: KeywordOutput = self
            .stage(&mut run, StageName::KeywordDetect, || matcher.match_keywords(&transcript))
            .await?;

        let disclosure_detector = &self.adapters.disclosure;
        let disclosure: DisclosureOutput = self
            .stage(&mut run, StageName::DisclosureDetect, || disclosure_detector.detect(&transcript))
            .await?;

        let scores = ComponentScores {
            visual: visual.visual_score,
            audio: transcript.audio_score,
            text: keywords.text_score,
            disclosure: disclosure.disclosure_score,
        };
        let aggregator = &self.adapters.aggregator;
        let aggregate: AggregateOutput = self
            .stage(&mut run, StageName::Aggregate, || {
                let output = aggregator.aggregate(&scores);
                async move { Ok::<_, StageError>(output) }.boxed()
            })
            .await?;

        let result = AnalysisResult {
            job_id: id.clone(),
            platform: run.job().platform,
            visual_score: aggregate.scores.visual,
            audio_score: aggregate.scores.audio,
            text_score: aggregate.scores.text,
            disclosure_score: aggregate.scores.disclosure,
            confidence_score: aggregate.confidence,
            has_advertising: aggregate.has_advertising,
            detected_brands: visual.brands,
            detected_keywords: keywords.keywords,
            transcript: transcript.text,
            disclosure_markers: disclosure.markers,
            frames_analyzed: visual.frames_sampled,
            analyzed_at: Utc::now(),
        };

        self.persist_report(&run, result).await
    }

    /// Restore a stage output, or drop this and every later checkpoint.
    async fn load_checkpoint<T: DeserializeOwned>(&self, run: &mut JobRun<'_>, stage: StageName) -> Option<T> {
        if !run.trusts(stage) {
            return None;
        }
        let (artifact, digest) = {
            let checkpoint = run.checkpoints.get(&stage)?;
            (checkpoint.artifact.clone(), checkpoint.digest.clone())
        };

        match get_json_verified::<T>(self.artifacts.as_ref(), &artifact, &digest).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(job_id = %run.id(), stage = %stage, "Discarding checkpoint: {}", e);
                metrics::record_checkpoint_invalidated(stage);
                run.rerun_from(stage);
                None
            }
        }
    }

    fn resumed(&self, run: &JobRun<'_>, stage: StageName) {
        metrics::record_checkpoint_resume(stage);
        run.logger.log_stage_resumed(stage);
    }

    /// Restore `stage` from its checkpoint, or run `op` and checkpoint its output.
    async fn stage<'f, T, F>(&self, run: &mut JobRun<'_>, stage: StageName, mut op: F) -> WorkerResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'f,
        F: FnMut() -> BoxFuture<'f, StageResult<T>> + Send,
    {
        if let Some(output) = self.load_checkpoint::<T>(run, stage).await {
            self.resumed(run, stage);
            return Ok(output);
        }
        run.rerun_from(stage);

        let key = ArtifactKey::stage(run.id(), stage, OUTPUT_NAME)?;
        let artifacts = self.artifacts.as_ref();

        let (output, stored) = self
            .attempt(run, stage, || {
                let output = op();
                let key = &key;
                async move {
                    let output = output.await?;
                    let stored = put_json(artifacts, key, &output).await?;
                    Ok::<_, StageError>((output, stored))
                }
                .boxed()
            })
            .await?;

        self.store
            .save_checkpoint(
                run.id(),
                &run.claimed.owner,
                StageCheckpoint {
                    stage,
                    artifact: stored.artifact,
                    digest: stored.digest,
                    completed_at: Utc::now(),
                },
            )
            .await
            .map_err(|e| fenced(e, run.id()))?;

        Ok(output)
    }

    /// Run `op` under the retry policy and record every attempt.
    async fn attempt<'f, T, F>(&self, run: &JobRun<'_>, stage: StageName, op: F) -> WorkerResult<T>
    where
        T: Send + 'f,
        F: FnMut() -> BoxFuture<'f, StageResult<T>> + Send,
    {
        let escalate = stage == StageName::Download && run.escalate_download_timeouts;
        let StageRun { result, attempts } = run_with_retry(
            &self.config.retry,
            stage,
            self.config.timeout_for(stage),
            escalate,
            op,
        )
        .instrument(run.logger.stage_span(stage))
        .await;

        let count = attempts.len() as u32;
        for attempt in attempts {
            if let Err(e) = self.store.record_attempt(run.id(), attempt).await {
                warn!(job_id = %run.id(), stage = %stage, "Failed to record stage attempt: {}", e);
            }
        }

        match result {
            Ok(value) => {
                run.logger.log_stage_completed(stage, count);
                Ok(value)
            }
            Err(e) => Err(WorkerError::stage(stage, e)),
        }
    }

    async fn download_stage(&self, run: &mut JobRun<'_>) -> WorkerResult<DownloadOutput> {
        if let Some(output) = self.load_checkpoint::<DownloadOutput>(run, StageName::Download).await {
            match self.artifacts.exists(&output.media).await {
                Ok(true) => {
                    self.resumed(run, StageName::Download);
                    return Ok(output);
                }
                Ok(false) => warn!(job_id = %run.id(), media = %output.media, "Checkpointed media is gone"),
                Err(e) => warn!(job_id = %run.id(), media = %output.media, "Cannot check media: {}", e),
            }
            metrics::record_checkpoint_invalidated(StageName::Download);
            run.rerun_from(StageName::Download);
        }

        let claimed = run.claimed;
        let job = &claimed.job;
        if claimed.reclaimed && job.input_type == InputType::File {
            let available = match job.media_path.as_deref().map(ArtifactRef::new) {
                Some(source) => self.artifacts.exists(&source).await.unwrap_or(false),
                None => false,
            };
            if !available {
                return Err(WorkerError::orphan_reclaim(format!(
                    "uploaded media {} is no longer available",
                    job.media_path.as_deref().unwrap_or("<none>")
                )));
            }
        }

        let downloader = &self.adapters.downloader;
        let artifacts = self.artifacts.as_ref();
        let fetch_dir = run.dir.join(MEDIA_DIR);

        self.stage(run, StageName::Download, || {
            let fetch_dir = &fetch_dir;
            async move {
                let fetched = downloader.download(job, fetch_dir).await?;
                let file_name = sanitize_file_name(
                    fetched
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("media.bin"),
                );
                let key = ArtifactKey::stage(&job.id, StageName::Download, &file_name)?;
                let stored = artifacts.put_file(&key, &fetched.path, &fetched.content_type).await?;
                Ok::<_, StageError>(DownloadOutput {
                    media: stored.artifact,
                    file_name,
                    content_type: fetched.content_type,
                    size: stored.size,
                })
            }
            .boxed()
        })
        .await
    }

    /// Point `media_path` at the job's copy of fetched URL media.
    async fn record_media_path(&self, run: &JobRun<'_>, download: &DownloadOutput) -> WorkerResult<()> {
        let job = run.job();
        if job.input_type != InputType::Url || job.media_path.as_deref() == Some(download.media.as_str()) {
            return Ok(());
        }

        let owner = run.claimed.owner.clone();
        self.store
            .transition(
                run.id(),
                Expected::status(JobStatus::Processing).owned_by(owner.clone()),
                JobStatus::Processing,
                JobUpdate::lease(owner).with_media_path(download.media.as_str()),
            )
            .await
            .map_err(|e| fenced(e, run.id()))?;
        Ok(())
    }

    /// Local copy of the media, fetched from the artifact store after a resume.
    async fn local_media(&self, run: &JobRun<'_>, download: &DownloadOutput) -> WorkerResult<PathBuf> {
        let path = run.dir.join(MEDIA_DIR).join(&download.file_name);
        if !tokio::fs::try_exists(&path).await? {
            self.artifacts.fetch_to_path(&download.media, &path).await?;
        }
        Ok(path)
    }

    async fn persist_report(&self, run: &JobRun<'_>, result: AnalysisResult) -> WorkerResult<Job> {
        let id = run.id();
        let result_key = ArtifactKey::stage(id, StageName::PersistReport, RESULT_NAME)?;
        let report_key = ArtifactKey::stage(id, StageName::PersistReport, REPORT_NAME)?;
        let artifacts = self.artifacts.as_ref();
        let renderer = &self.adapters.renderer;

        let (result_ref, report_url) = self
            .attempt(run, StageName::PersistReport, || {
                let (result, result_key, report_key) = (&result, &result_key, &report_key);
                async move {
                    let stored = put_json(artifacts, result_key, result).await?;
                    let html = renderer.render(result).await?;
                    let report = artifacts
                        .put(report_key, html.into_bytes(), "text/html; charset=utf-8")
                        .await?;
                    let url = artifacts.url_for(&report.artifact).await?;
                    Ok::<_, StageError>((stored.artifact, url))
                }
                .boxed()
            })
            .await?;

        let owner = run.claimed.owner.clone();
        self.store
            .transition(
                id,
                Expected::status(JobStatus::Processing).owned_by(owner),
                JobStatus::Completed,
                JobUpdate::complete(result_ref.as_str(), Some(report_url)),
            )
            .await
            .map_err(|e| fenced(e, id))
    }
}
