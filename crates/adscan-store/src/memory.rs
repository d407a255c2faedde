//! In-process job store.
//!
//! Backs tests and single-process deployments. All operations take one
//! lock, so every compare-and-swap is trivially atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use adscan_models::{
    Expected, Job, JobId, JobSpec, JobStatus, JobUpdate, StageAttempt, StageCheckpoint, StageName, WorkerId,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_transition, result_label};
use crate::store::{ensure_lease_holder, JobStore, MAX_ATTEMPTS_PER_JOB};

#[derive(Debug)]
struct JobRecord {
    job: Job,
    checkpoints: BTreeMap<StageName, StageCheckpoint>,
    attempts: Vec<StageAttempt>,
}

/// Job store held in memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, spec: JobSpec) -> StoreResult<JobId> {
        spec.validate().map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        let job = Job::new(spec, Utc::now());
        let id = job.id.clone();

        self.records.write().await.insert(
            id.clone(),
            JobRecord {
                job,
                checkpoints: BTreeMap::new(),
                attempts: Vec::new(),
            },
        );

        debug!(job_id = %id, "Created job");
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.records
            .read()
            .await
            .get(id)
            .map(|r| r.job.clone())
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn transition(
        &self,
        id: &JobId,
        expected: Expected,
        next: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<Job> {
        let result = {
            let mut records = self.records.write().await;
            match records.get_mut(id) {
                None => Err(StoreError::not_found(id)),
                Some(record) => match record.job.apply_transition(&expected, next, update, Utc::now()) {
                    Ok(job) => {
                        record.job = job.clone();
                        Ok(job)
                    }
                    Err(e) => Err(StoreError::from(e)),
                },
            }
        };

        record_transition(next.as_str(), result_label(&result));
        result
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<Job>> {
        let records = self.records.read().await;
        let mut jobs: Vec<Job> = records
            .values()
            .filter(|r| r.job.status == status)
            .map(|r| r.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn save_checkpoint(&self, id: &JobId, owner: &WorkerId, checkpoint: StageCheckpoint) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        ensure_lease_holder(&record.job, owner)?;
        record.checkpoints.insert(checkpoint.stage, checkpoint);
        Ok(())
    }

    async fn checkpoints(&self, id: &JobId) -> StoreResult<Vec<StageCheckpoint>> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| StoreError::not_found(id))?;
        Ok(record.checkpoints.values().cloned().collect())
    }

    async fn record_attempt(&self, id: &JobId, attempt: StageAttempt) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        record.attempts.push(attempt);
        if record.attempts.len() > MAX_ATTEMPTS_PER_JOB {
            let excess = record.attempts.len() - MAX_ATTEMPTS_PER_JOB;
            record.attempts.drain(..excess);
        }
        Ok(())
    }

    async fn attempts(&self, id: &JobId) -> StoreResult<Vec<StageAttempt>> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| StoreError::not_found(id))?;
        Ok(record.attempts.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use adscan_models::{ArtifactRef, StageOutcome};

    fn url_spec() -> JobSpec {
        JobSpec::from_url("https://www.youtube.com/watch?v=abc", None).unwrap()
    }

    fn checkpoint(stage: StageName) -> StageCheckpoint {
        StageCheckpoint {
            stage,
            artifact: ArtifactRef::new(format!("jobs/x/{stage}/out.json")),
            digest: "00".into(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let id = store.create(url_spec()).await.unwrap();
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.version, 0);

        let missing = store.get(&JobId::from_string("nope")).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_spec() {
        let store = MemoryJobStore::new();
        let mut spec = url_spec();
        spec.media_path = Some("also-set".into());
        assert!(matches!(store.create(spec).await, Err(StoreError::InvalidInput(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_transition_conflict_is_stale() {
        let store = MemoryJobStore::new();
        let id = store.create(url_spec()).await.unwrap();
        let owner = WorkerId::new();

        store
            .transition(&id, JobStatus::Pending.into(), JobStatus::Processing, JobUpdate::lease(owner.clone()))
            .await
            .unwrap();

        let err = store
            .transition(&id, JobStatus::Pending.into(), JobStatus::Processing, JobUpdate::lease(WorkerId::new()))
            .await
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(store.get(&id).await.unwrap().lease_owner(), Some(&owner));
    }

    #[tokio::test]
    async fn test_concurrent_claims_exactly_one_wins() {
        let store = Arc::new(MemoryJobStore::new());
        let id = store.create(url_spec()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, JobStatus::Pending.into(), JobStatus::Processing, JobUpdate::lease(WorkerId::new()))
                    .await
            }));
        }

        let results = futures::future::join_all(handles).await;
        let wins = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let stale = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(e)) if e.is_stale()))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(stale, 15);
    }

    #[tokio::test]
    async fn test_checkpoints_are_fenced_by_lease() {
        let store = MemoryJobStore::new();
        let id = store.create(url_spec()).await.unwrap();
        let owner = WorkerId::new();

        // Not processing yet.
        let err = store
            .save_checkpoint(&id, &owner, checkpoint(StageName::Download))
            .await
            .unwrap_err();
        assert!(err.is_stale());

        store
            .transition(&id, JobStatus::Pending.into(), JobStatus::Processing, JobUpdate::lease(owner.clone()))
            .await
            .unwrap();

        store.save_checkpoint(&id, &owner, checkpoint(StageName::Transcribe)).await.unwrap();
        store.save_checkpoint(&id, &owner, checkpoint(StageName::Download)).await.unwrap();

        let err = store
            .save_checkpoint(&id, &WorkerId::new(), checkpoint(StageName::VisualDetect))
            .await
            .unwrap_err();
        assert!(err.is_stale());

        let stages: Vec<StageName> = store.checkpoints(&id).await.unwrap().into_iter().map(|c| c.stage).collect();
        assert_eq!(stages, vec![StageName::Download, StageName::Transcribe]);
    }

    #[tokio::test]
    async fn test_attempt_ledger_is_capped() {
        let store = MemoryJobStore::new();
        let id = store.create(url_spec()).await.unwrap();

        for i in 0..(MAX_ATTEMPTS_PER_JOB + 5) {
            store
                .record_attempt(
                    &id,
                    StageAttempt {
                        stage: StageName::Download,
                        attempt: i as u32 + 1,
                        started_at: Utc::now(),
                        finished_at: Utc::now(),
                        outcome: StageOutcome::TransientFailure,
                        error: Some("timeout".into()),
                    },
                )
                .await
                .unwrap();
        }

        let attempts = store.attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), MAX_ATTEMPTS_PER_JOB);
        assert_eq!(attempts[0].attempt, 6);
    }

    #[tokio::test]
    async fn test_list_by_status_oldest_first() {
        let store = MemoryJobStore::new();
        let first = store.create(url_spec()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.create(url_spec()).await.unwrap();

        let pending = store.list_by_status(JobStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.iter().map(|j| j.id.clone()).collect::<Vec<_>>(), vec![first, second]);

        let limited = store.list_by_status(JobStatus::Pending, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(store.list_by_status(JobStatus::Failed, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_processing_listing_puts_renewed_jobs_last() {
        let store = MemoryJobStore::new();
        let owner = WorkerId::new();
        let first = store.create(url_spec()).await.unwrap();
        let second = store.create(url_spec()).await.unwrap();
        for id in [&first, &second] {
            store
                .transition(id, JobStatus::Pending.into(), JobStatus::Processing, JobUpdate::lease(owner.clone()))
                .await
                .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .transition(
                &first,
                Expected::status(JobStatus::Processing).owned_by(owner.clone()),
                JobStatus::Processing,
                JobUpdate::lease(owner.clone()),
            )
            .await
            .unwrap();

        let processing = store.list_by_status(JobStatus::Processing, 1).await.unwrap();
        assert_eq!(processing[0].id, second);
    }
}
