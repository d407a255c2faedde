//! Job entity and its state machine.
//!
//! A job moves strictly forward: `pending -> processing -> {completed, failed}`.
//! `processing -> processing` is allowed for lease renewal and orphan reclaim.
//! Every transition is evaluated by [`Job::apply_transition`], which both job
//! store implementations share, so the rules cannot drift between backends.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::Platform;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a worker process/task holding leases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Generate a new random worker ID.
    pub fn new() -> Self {
        Self(format!("worker-{}", Uuid::new_v4()))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to claim it
    #[default]
    Pending,
    /// Claimed by a worker and moving through the pipeline
    Processing,
    /// All stages ran and the result was persisted
    Completed,
    /// A stage failed permanently or exhausted its retries
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// How the media was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Url,
    File,
}

/// A worker's claim on a processing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Lease {
    pub owner: WorkerId,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

/// Errors from validating an ingress spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobSpecError {
    #[error("input URL is not a valid http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("platform {0} requires a URL input")]
    UrlRequired(Platform),

    #[error("file uploads require a media path")]
    MediaPathRequired,

    #[error("exactly one of input_url or media_path must be set")]
    AmbiguousInput,
}

/// Ingress request for a new job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobSpec {
    pub platform: Platform,
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
}

impl JobSpec {
    /// Build a URL job. When `platform` is `None` it is detected from the host.
    pub fn from_url(input_url: impl Into<String>, platform: Option<Platform>) -> Result<Self, JobSpecError> {
        let input_url = input_url.into().trim().to_string();
        let detected = Platform::detect(&input_url).ok_or_else(|| JobSpecError::InvalidUrl(input_url.clone()))?;
        let spec = Self {
            platform: platform.unwrap_or(detected),
            input_type: InputType::Url,
            input_url: Some(input_url),
            media_path: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Build a job for media that was already uploaded to the artifact store.
    pub fn from_upload(media_path: impl Into<String>) -> Result<Self, JobSpecError> {
        let spec = Self {
            platform: Platform::FileUpload,
            input_type: InputType::File,
            input_url: None,
            media_path: Some(media_path.into()),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check that exactly one input reference is present and matches the platform.
    pub fn validate(&self) -> Result<(), JobSpecError> {
        match (self.input_type, &self.input_url, &self.media_path) {
            (InputType::Url, Some(raw), None) => {
                if !self.platform.is_url_based() {
                    return Err(JobSpecError::MediaPathRequired);
                }
                let parsed = url::Url::parse(raw).map_err(|_| JobSpecError::InvalidUrl(raw.clone()))?;
                if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                    return Err(JobSpecError::InvalidUrl(raw.clone()));
                }
                Ok(())
            }
            (InputType::File, None, Some(path)) => {
                if self.platform.is_url_based() {
                    return Err(JobSpecError::UrlRequired(self.platform));
                }
                if path.trim().is_empty() {
                    return Err(JobSpecError::MediaPathRequired);
                }
                Ok(())
            }
            (InputType::File, None, None) => Err(JobSpecError::MediaPathRequired),
            (InputType::Url, None, None) => Err(JobSpecError::UrlRequired(self.platform)),
            _ => Err(JobSpecError::AmbiguousInput),
        }
    }
}

/// Precondition of a compare-and-swap transition.
///
/// `status` is always compared; `version` and `owner` only when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub status: JobStatus,
    pub version: Option<u64>,
    pub owner: Option<WorkerId>,
}

impl Expected {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            version: None,
            owner: None,
        }
    }

    /// Require an exact version (used when reclaiming an orphaned job).
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Require the current lease to belong to `owner`.
    pub fn owned_by(mut self, owner: WorkerId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl From<JobStatus> for Expected {
    fn from(status: JobStatus) -> Self {
        Self::status(status)
    }
}

/// Field mutations applied atomically with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub lease_owner: Option<WorkerId>,
    pub media_path: Option<String>,
    pub result_path: Option<String>,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    /// Claim, reclaim or renew on behalf of `owner`.
    pub fn lease(owner: WorkerId) -> Self {
        Self {
            lease_owner: Some(owner),
            ..Default::default()
        }
    }

    pub fn complete(result_path: impl Into<String>, result_url: Option<String>) -> Self {
        Self {
            result_path: Some(result_path.into()),
            result_url,
            ..Default::default()
        }
    }

    pub fn fail(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    pub fn with_media_path(mut self, media_path: impl Into<String>) -> Self {
        self.media_path = Some(media_path.into());
        self
    }
}

/// Reasons a transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The stored job no longer matches the precondition, or it is terminal.
    #[error("stale job {job_id}: {reason}")]
    Stale { job_id: JobId, reason: String },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("transition to {to} requires {field}")]
    MissingField { to: JobStatus, field: &'static str },
}

/// A submitted analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    pub status: JobStatus,

    /// Source platform
    pub platform: Platform,

    /// URL or uploaded file
    pub input_type: InputType,

    /// Raw input reference (URL jobs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_url: Option<String>,

    /// Media artifact reference (uploads, or after Download)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,

    /// Persisted analysis artifact (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,

    /// Retrievable URL of the analysis artifact (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,

    /// Human-readable failure cause (failed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Strictly increasing on every transition
    pub updated_at: DateTime<Utc>,

    /// CAS token, bumped on every transition
    #[serde(default)]
    pub version: u64,

    /// Current claim (processing only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,

    /// Number of times the job was claimed or reclaimed
    #[serde(default)]
    pub attempt_count: u32,
}

impl Job {
    /// Create a pending job from a validated spec.
    pub fn new(spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            platform: spec.platform,
            input_type: spec.input_type,
            input_url: spec.input_url,
            media_path: spec.media_path,
            result_path: None,
            result_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            version: 0,
            lease: None,
            attempt_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Owner of the current lease, if any.
    pub fn lease_owner(&self) -> Option<&WorkerId> {
        self.lease.as_ref().map(|l| &l.owner)
    }

    /// A processing job whose last transition is older than `liveness_timeout`.
    pub fn is_orphaned(&self, liveness_timeout: Duration, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let timeout = ChronoDuration::from_std(liveness_timeout).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(self.updated_at) > timeout
    }

    /// Evaluate a compare-and-swap transition and return the successor record.
    ///
    /// Pure: the caller is responsible for persisting the result atomically.
    pub fn apply_transition(
        &self,
        expected: &Expected,
        next: JobStatus,
        update: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Job, TransitionError> {
        let stale = |reason: String| TransitionError::Stale {
            job_id: self.id.clone(),
            reason,
        };

        if self.status.is_terminal() {
            return Err(stale(format!("job is already {}", self.status)));
        }
        if self.status != expected.status {
            return Err(stale(format!("expected {}, found {}", expected.status, self.status)));
        }
        if let Some(version) = expected.version {
            if version != self.version {
                return Err(stale(format!("expected version {}, found {}", version, self.version)));
            }
        }
        if let Some(owner) = &expected.owner {
            if self.lease_owner() != Some(owner) {
                return Err(stale(format!("lease is not held by {owner}")));
            }
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let mut job = self.clone();

        match next {
            JobStatus::Processing => {
                let owner = update.lease_owner.ok_or(TransitionError::MissingField {
                    to: next,
                    field: "lease_owner",
                })?;
                job.lease = match self.lease.as_ref() {
                    Some(current) if self.status == JobStatus::Processing && current.owner == owner => {
                        Some(Lease {
                            renewed_at: now,
                            ..current.clone()
                        })
                    }
                    _ => {
                        job.attempt_count += 1;
                        Some(Lease {
                            owner,
                            acquired_at: now,
                            renewed_at: now,
                        })
                    }
                };
            }
            JobStatus::Completed => {
                let result_path = update.result_path.ok_or(TransitionError::MissingField {
                    to: next,
                    field: "result_path",
                })?;
                job.result_path = Some(result_path);
                job.result_url = update.result_url;
                job.error_message = None;
                job.lease = None;
            }
            JobStatus::Failed => {
                let error_message = update.error_message.ok_or(TransitionError::MissingField {
                    to: next,
                    field: "error_message",
                })?;
                job.error_message = Some(error_message);
                job.result_path = None;
                job.result_url = None;
                job.lease = None;
            }
            JobStatus::Pending => {
                return Err(TransitionError::InvalidTransition {
                    from: self.status,
                    to: next,
                })
            }
        }

        if let Some(media_path) = update.media_path {
            job.media_path = Some(media_path);
        }

        job.status = next;
        job.version = self.version + 1;
        job.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + ChronoDuration::microseconds(1)
        };

        Ok(job)
    }

    /// Client-facing projection.
    pub fn view(&self) -> JobView {
        JobView::from(self)
    }
}

/// The job fields exposed to clients (no lease or CAS bookkeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub platform: Platform,
    pub input_type: InputType,
    pub input_url: Option<String>,
    pub media_path: Option<String>,
    pub result_path: Option<String>,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            platform: job.platform,
            input_type: job.input_type,
            input_url: job.input_url.clone(),
            media_path: job.media_path.clone(),
            result_path: job.result_path.clone(),
            result_url: job.result_url.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
