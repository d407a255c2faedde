//! Advertising-detection worker.
//!
//! This crate provides:
//! - Analyzer adapters for each pipeline stage
//! - The checkpointing pipeline coordinator
//! - Stage retry with backoff and per-attempt timeouts
//! - A job executor with lease heartbeats and graceful shutdown

pub mod analyzers;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;

pub use analyzers::Adapters;
pub use config::{PipelineConfig, WorkerConfig};
pub use error::{StageError, StageResult, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{PipelineCoordinator, PipelineOutcome};
pub use retry::RetryPolicy;
