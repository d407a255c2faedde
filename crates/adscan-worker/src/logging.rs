//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use adscan_models::{JobId, StageName, WorkerId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    worker: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker: &WorkerId) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker: worker.to_string(),
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job started: {}", message
        );
    }

    pub fn log_stage_resumed(&self, stage: StageName) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            "Stage restored from checkpoint"
        );
    }

    pub fn log_stage_completed(&self, stage: StageName, attempts: u32) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            attempts,
            "Stage completed"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job completed: {}", message
        );
    }

    /// A span carrying the job id for everything the job logs.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            worker = %self.worker
        )
    }

    pub fn stage_span(&self, stage: StageName) -> Span {
        tracing::info_span!("stage", job_id = %self.job_id, stage = %stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, &WorkerId::from_string("worker-1"));

        assert_eq!(logger.job_id, job_id.to_string());
        assert_eq!(logger.worker, "worker-1");
    }
}
