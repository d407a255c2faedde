//! Dispatch queue on top of the job store.
//!
//! There is no separate message broker: the pending status index is the
//! queue, and the compare-and-swap claim is the dequeue. Processing jobs that
//! stopped heartbeating are offered again as orphans.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use adscan_models::{Expected, Job, JobId, JobSpec, JobStatus, JobUpdate, WorkerId};
use adscan_store::{JobStore, StoreError};

use crate::error::{QueueError, QueueResult};
use crate::metrics;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// A processing job with no transition for this long is orphaned
    pub liveness_timeout: Duration,
    /// Candidates listed per status on each poll
    pub scan_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(120),
            scan_limit: 50,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(
                std::env::var("QUEUE_LIVENESS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            scan_limit: std::env::var("QUEUE_SCAN_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.scan_limit == 0 {
            return Err(QueueError::InvalidConfig("scan_limit must be positive".into()));
        }
        Ok(())
    }
}

/// A job this worker now holds the lease on.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub owner: WorkerId,
    /// Taken over from a worker that stopped heartbeating
    pub reclaimed: bool,
}

impl ClaimedJob {
    pub fn id(&self) -> &JobId {
        &self.job.id
    }
}

/// Submits jobs and hands them out to workers.
#[derive(Clone)]
pub struct DispatchQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl DispatchQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create a pending job.
    pub async fn submit(&self, spec: JobSpec) -> QueueResult<JobId> {
        let platform = spec.platform;
        let id = self.store.create(spec).await?;
        metrics::record_submitted(platform.as_str());
        info!(job_id = %id, platform = %platform, "Submitted job");
        Ok(id)
    }

    /// Claim up to `max` jobs: pending ones first (oldest first), then orphans
    /// (least recently heartbeated first).
    ///
    /// Lost races are skipped silently.
    pub async fn poll(&self, worker: &WorkerId, max: usize) -> QueueResult<Vec<ClaimedJob>> {
        let mut claimed = Vec::new();
        if max == 0 {
            return Ok(claimed);
        }

        for job in self.store.list_by_status(JobStatus::Pending, self.config.scan_limit).await? {
            if claimed.len() >= max {
                return Ok(claimed);
            }
            if let Some(job) = self.claim(&job, worker).await? {
                claimed.push(job);
            }
        }

        let now = Utc::now();
        for job in self.store.list_by_status(JobStatus::Processing, self.config.scan_limit).await? {
            if claimed.len() >= max {
                break;
            }
            // Listed stalest first, so the first live job ends the scan. An
            // orphan still leased to `worker` is fair game: a job this worker
            // is running keeps heartbeating and never gets here.
            if !job.is_orphaned(self.config.liveness_timeout, now) {
                break;
            }
            if let Some(job) = self.claim(&job, worker).await? {
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    /// Try to take `job` as seen in a listing. Returns `None` if another worker won.
    pub async fn claim(&self, job: &Job, worker: &WorkerId) -> QueueResult<Option<ClaimedJob>> {
        let (expected, reclaimed) = match job.status {
            JobStatus::Pending => (Expected::status(JobStatus::Pending), false),
            JobStatus::Processing => (Expected::status(JobStatus::Processing).with_version(job.version), true),
            _ => return Ok(None),
        };

        match self
            .store
            .transition(&job.id, expected, JobStatus::Processing, JobUpdate::lease(worker.clone()))
            .await
        {
            Ok(job) => {
                metrics::record_claim(reclaimed);
                if reclaimed {
                    warn!(job_id = %job.id, worker = %worker, attempt = job.attempt_count, "Reclaimed orphaned job");
                } else {
                    debug!(job_id = %job.id, worker = %worker, "Claimed job");
                }
                Ok(Some(ClaimedJob {
                    job,
                    owner: worker.clone(),
                    reclaimed,
                }))
            }
            Err(StoreError::Stale(reason)) => {
                metrics::record_claim_conflict();
                debug!(job_id = %job.id, worker = %worker, "Lost claim race: {}", reason);
                Ok(None)
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Heartbeat: renew the lease. [`QueueError::LeaseLost`] means stop working on the job.
    pub async fn renew(&self, claimed: &ClaimedJob) -> QueueResult<Job> {
        match self
            .store
            .transition(
                claimed.id(),
                Expected::status(JobStatus::Processing).owned_by(claimed.owner.clone()),
                JobStatus::Processing,
                JobUpdate::lease(claimed.owner.clone()),
            )
            .await
        {
            Ok(job) => Ok(job),
            Err(StoreError::Stale(_)) | Err(StoreError::NotFound(_)) => Err(QueueError::LeaseLost(claimed.id().clone())),
            Err(e) => Err(e.into()),
        }
    }
}
