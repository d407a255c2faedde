//! Pipeline and executor metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use adscan_models::{JobStatus, StageName, StageOutcome};

/// Metric name constants for consistency.
pub mod names {
    /// Stage attempts by stage and outcome.
    pub const STAGE_ATTEMPTS_TOTAL: &str = "adscan_stage_attempts_total";

    /// Wall time of one stage attempt.
    pub const STAGE_DURATION_SECONDS: &str = "adscan_stage_duration_seconds";

    /// Stages skipped because a valid checkpoint existed.
    pub const CHECKPOINT_RESUMES_TOTAL: &str = "adscan_checkpoint_resumes_total";

    /// Checkpoints dropped because their artifact was missing or corrupt.
    pub const CHECKPOINT_INVALIDATIONS_TOTAL: &str = "adscan_checkpoint_invalidations_total";

    /// Jobs finished by terminal status.
    pub const JOBS_FINISHED_TOTAL: &str = "adscan_jobs_finished_total";

    /// Jobs given up because another worker took the lease.
    pub const JOBS_ABANDONED_TOTAL: &str = "adscan_jobs_abandoned_total";

    pub const JOBS_IN_FLIGHT: &str = "adscan_jobs_in_flight";
}

fn outcome_label(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Success => "success",
        StageOutcome::TransientFailure => "transient_failure",
        StageOutcome::PermanentFailure => "permanent_failure",
    }
}

pub fn record_stage_attempt(stage: StageName, outcome: StageOutcome, elapsed: Duration) {
    counter!(
        names::STAGE_ATTEMPTS_TOTAL,
        "stage" => stage.as_str(),
        "outcome" => outcome_label(outcome)
    )
    .increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_checkpoint_resume(stage: StageName) {
    counter!(names::CHECKPOINT_RESUMES_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_checkpoint_invalidated(stage: StageName) {
    counter!(names::CHECKPOINT_INVALIDATIONS_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_job_finished(status: JobStatus) {
    counter!(names::JOBS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_job_abandoned() {
    counter!(names::JOBS_ABANDONED_TOTAL).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
