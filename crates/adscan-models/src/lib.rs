//! Shared data models for the AdScan backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and the job state machine
//! - Source platforms and ingress specs
//! - Analysis results and detected brands
//! - Pipeline stage bookkeeping (attempts, checkpoints)

pub mod analysis;
pub mod artifact;
pub mod job;
pub mod platform;
pub mod stage;

// Re-export common types
pub use analysis::{clamp_unit, merge_brands, AnalysisResult, ComponentScores, DetectedBrand};
pub use artifact::ArtifactRef;
pub use job::{
    Expected, InputType, Job, JobId, JobSpec, JobSpecError, JobStatus, JobUpdate, JobView, Lease,
    TransitionError, WorkerId,
};
pub use platform::Platform;
pub use stage::{StageAttempt, StageCheckpoint, StageName, StageOutcome};
