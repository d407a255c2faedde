//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Semaphore};
use tracing::{debug, error, info, warn};

use adscan_models::WorkerId;
use adscan_queue::{ClaimedJob, DispatchQueue, QueueError};

use crate::config::WorkerConfig;
use crate::metrics;
use crate::pipeline::{PipelineCoordinator, PipelineOutcome};
use crate::retry::FailureTracker;

/// Pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Heartbeat failures logged before going quiet.
const MAX_LOGGED_HEARTBEAT_FAILURES: u32 = 3;

/// Polls the dispatch queue and runs claimed jobs through the pipeline.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: DispatchQueue,
    coordinator: Arc<PipelineCoordinator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    worker_id: WorkerId,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: DispatchQueue, coordinator: Arc<PipelineCoordinator>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            coordinator,
            job_semaphore,
            shutdown,
            worker_id: WorkerId::new(),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Poll until [`JobExecutor::shutdown`] is called, then drain in-flight jobs.
    pub async fn run(&self) {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.worker_id, self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }
            // A poll runs to completion so every job it claims gets spawned;
            // only the idle wait is cut short by shutdown.
            let idle = self.poll_once().await;
            if !idle.is_zero() {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout elapsed with jobs still running; their leases will expire and be reclaimed"
            );
        }

        info!("Job executor stopped");
    }

    /// Claim as many jobs as there are free slots and spawn them.
    ///
    /// Returns how long to wait before the next poll.
    async fn poll_once(&self) -> Duration {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            return Duration::from_millis(100);
        }

        let jobs = match self.queue.poll(&self.worker_id, available).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Error polling for jobs: {}", e);
                return POLL_ERROR_BACKOFF;
            }
        };

        if jobs.is_empty() {
            return self.config.poll_interval;
        }

        debug!("Claimed {} jobs", jobs.len());

        for claimed in jobs {
            let permit = match self.job_semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Duration::ZERO,
            };
            let coordinator = Arc::clone(&self.coordinator);
            let queue = self.queue.clone();
            let semaphore = Arc::clone(&self.job_semaphore);
            let max_jobs = self.config.max_concurrent_jobs;
            let heartbeat_interval = self.config.heartbeat_interval;
            let job_dir = self.config.work_dir.join(claimed.id().as_str());

            metrics::set_jobs_in_flight(max_jobs - semaphore.available_permits());

            tokio::spawn(async move {
                let lost = Self::execute_job(coordinator, queue, claimed, heartbeat_interval).await;
                if lost {
                    let _ = tokio::fs::remove_dir_all(&job_dir).await;
                }
                drop(permit);
                metrics::set_jobs_in_flight(max_jobs - semaphore.available_permits());
            });
        }
        Duration::ZERO
    }

    /// Run one job while a heartbeat keeps its lease alive.
    ///
    /// Returns `true` if the job was dropped mid-run because the lease was lost.
    async fn execute_job(
        coordinator: Arc<PipelineCoordinator>,
        queue: DispatchQueue,
        claimed: ClaimedJob,
        heartbeat_interval: Duration,
    ) -> bool {
        let job_id = claimed.id().clone();
        let (lost_tx, lost_rx) = oneshot::channel();
        let heartbeat = tokio::spawn(heartbeat(queue, claimed.clone(), heartbeat_interval, lost_tx));

        let lost = tokio::select! {
            outcome = coordinator.run(&claimed) => {
                match outcome {
                    Ok(PipelineOutcome::Completed(_)) => info!(job_id = %job_id, "Job completed"),
                    Ok(PipelineOutcome::Failed(job)) => warn!(
                        job_id = %job_id,
                        "Job failed: {}",
                        job.error_message.as_deref().unwrap_or_default()
                    ),
                    Ok(PipelineOutcome::Abandoned) => info!(job_id = %job_id, "Job abandoned to another worker"),
                    Err(e) => error!(job_id = %job_id, "Job interrupted, leaving it for reclaim: {}", e),
                }
                false
            }
            Ok(()) = lost_rx => {
                warn!(job_id = %job_id, "Lease lost, dropping job");
                metrics::record_job_abandoned();
                true
            }
        };

        heartbeat.abort();
        lost
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Renew the lease every `interval` until it is lost.
async fn heartbeat(queue: DispatchQueue, claimed: ClaimedJob, interval: Duration, lost: oneshot::Sender<()>) {
    let mut failures = FailureTracker::new(MAX_LOGGED_HEARTBEAT_FAILURES);
    loop {
        tokio::time::sleep(interval).await;
        match queue.renew(&claimed).await {
            Ok(_) => failures.record_success(),
            Err(QueueError::LeaseLost(_)) => {
                let _ = lost.send(());
                return;
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!(job_id = %claimed.id(), "Lease renewal failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{harness, FakeDownloader};
    use adscan_models::{
        Expected, Job, JobId, JobSpec, JobStatus, JobUpdate, StageAttempt, StageCheckpoint,
    };
    use adscan_queue::QueueConfig;
    use adscan_store::{JobStore, MemoryJobStore, StoreResult};
    use async_trait::async_trait;

    /// Holds every transition open for a while after it is applied.
    struct SlowTransitions {
        inner: Arc<MemoryJobStore>,
        delay: Duration,
    }

    #[async_trait]
    impl JobStore for SlowTransitions {
        async fn create(&self, spec: JobSpec) -> StoreResult<JobId> {
            self.inner.create(spec).await
        }

        async fn get(&self, id: &JobId) -> StoreResult<Job> {
            self.inner.get(id).await
        }

        async fn transition(
            &self,
            id: &JobId,
            expected: Expected,
            next: JobStatus,
            update: JobUpdate,
        ) -> StoreResult<Job> {
            let result = self.inner.transition(id, expected, next, update).await;
            tokio::time::sleep(self.delay).await;
            result
        }

        async fn list_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<Job>> {
            self.inner.list_by_status(status, limit).await
        }

        async fn save_checkpoint(&self, id: &JobId, owner: &WorkerId, checkpoint: StageCheckpoint) -> StoreResult<()> {
            self.inner.save_checkpoint(id, owner, checkpoint).await
        }

        async fn checkpoints(&self, id: &JobId) -> StoreResult<Vec<StageCheckpoint>> {
            self.inner.checkpoints(id).await
        }

        async fn record_attempt(&self, id: &JobId, attempt: StageAttempt) -> StoreResult<()> {
            self.inner.record_attempt(id, attempt).await
        }

        async fn attempts(&self, id: &JobId) -> StoreResult<Vec<StageAttempt>> {
            self.inner.attempts(id).await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    fn config(dir: &std::path::Path) -> WorkerConfig {
        WorkerConfig {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(5),
            work_dir: dir.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_executor_completes_submitted_job_and_stops() {
        let h = harness(FakeDownloader::default(), false).await;
        let id = h.submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await;

        let queue = DispatchQueue::new(h.store.clone(), QueueConfig::default());

        let work = tempfile::tempdir().unwrap();
        let executor = Arc::new(JobExecutor::new(config(work.path()), queue, h.coordinator.clone()));
        let runner = tokio::spawn({
            let executor = executor.clone();
            async move { executor.run().await }
        });

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = h.store.get(&id).await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);

        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_reports_lost_lease() {
        let h = harness(FakeDownloader::default(), false).await;
        h.submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await;

        let a = WorkerId::from_string("worker-a");
        let claimed = h.queue.poll(&a, 1).await.unwrap().remove(0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let taken = h.queue.poll(&WorkerId::from_string("worker-b"), 1).await.unwrap();
        assert_eq!(taken.len(), 1);

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(heartbeat(h.queue.clone(), claimed, Duration::from_millis(1), tx));
        tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_poll_still_runs_claimed_jobs() {
        let h = harness(FakeDownloader::default(), false).await;
        let first = h.submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await;
        let second = h.submit("https://rutube.ru/video/abc/").await;

        let slow = Arc::new(SlowTransitions {
            inner: h.store.clone(),
            delay: Duration::from_millis(50),
        });
        let queue = DispatchQueue::new(slow, QueueConfig::default());

        let work = tempfile::tempdir().unwrap();
        let executor = Arc::new(JobExecutor::new(config(work.path()), queue, h.coordinator.clone()));
        let runner = tokio::spawn({
            let executor = executor.clone();
            async move { executor.run().await }
        });

        // The first claim has landed; the poll is still working on the second.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.get(&first).await.unwrap().status, JobStatus::Processing);
        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

        for id in [first, second] {
            assert_eq!(h.store.get(&id).await.unwrap().status, JobStatus::Completed);
        }
    }
}
