//! Job dispatch with lease-based claims.
//!
//! This crate provides:
//! - Job submission
//! - Worker polling with compare-and-swap claims (oldest pending first)
//! - Orphan reclaim for jobs whose worker stopped heartbeating
//! - Lease renewal

pub mod error;
pub mod metrics;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{ClaimedJob, DispatchQueue, QueueConfig};
