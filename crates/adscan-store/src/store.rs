//! The job store contract.

use async_trait::async_trait;

use adscan_models::{Expected, Job, JobId, JobSpec, JobStatus, JobUpdate, StageAttempt, StageCheckpoint, WorkerId};

use crate::error::StoreResult;

/// Maximum attempts kept per job in the stage ledger.
pub const MAX_ATTEMPTS_PER_JOB: usize = 200;

/// Durable record of jobs with compare-and-swap status transitions.
///
/// `transition` is the only synchronization primitive between workers: it
/// fails with [`StoreError::Stale`](crate::StoreError::Stale) when the stored
/// job no longer satisfies `expected`, and applies all field mutations
/// atomically with the status change when it succeeds.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate `spec` and persist a new pending job.
    async fn create(&self, spec: JobSpec) -> StoreResult<JobId>;

    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Compare-and-swap `expected -> next`, returning the stored successor.
    async fn transition(
        &self,
        id: &JobId,
        expected: Expected,
        next: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<Job>;

    /// Jobs currently in `status`, least recently transitioned first.
    ///
    /// Pending jobs never transition in place, so for them this is creation order.
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<Job>>;

    /// Record a stage checkpoint. Fenced: `owner` must hold the job's lease.
    async fn save_checkpoint(&self, id: &JobId, owner: &WorkerId, checkpoint: StageCheckpoint) -> StoreResult<()>;

    /// Checkpoints of a job, in stage order.
    async fn checkpoints(&self, id: &JobId) -> StoreResult<Vec<StageCheckpoint>>;

    /// Append a stage attempt to the job's ledger.
    async fn record_attempt(&self, id: &JobId, attempt: StageAttempt) -> StoreResult<()>;

    /// Stage attempts of a job, oldest first.
    async fn attempts(&self, id: &JobId) -> StoreResult<Vec<StageAttempt>>;

    /// Backend connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Check that `owner` may write stage data for `job`.
pub(crate) fn ensure_lease_holder(job: &Job, owner: &WorkerId) -> StoreResult<()> {
    if job.status != JobStatus::Processing || job.lease_owner() != Some(owner) {
        return Err(crate::StoreError::stale(format!(
            "job {} is {} and not leased by {}",
            job.id, job.status, owner
        )));
    }
    Ok(())
}
