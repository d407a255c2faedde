//! Pipeline coordinator.
//!
//! Drives one claimed job through the stages in order:
//! Download → Transcribe → VisualDetect → KeywordDetect → DisclosureDetect →
//! Aggregate → PersistReport.
//!
//! Every stage output is stored in the artifact store and checkpointed in the
//! job store, so a reclaimed job resumes after its last valid checkpoint.

mod coordinator;


pub use coordinator::{PipelineCoordinator, PipelineOutcome};
