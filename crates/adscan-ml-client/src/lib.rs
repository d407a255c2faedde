//! Client for the ML inference service.
//!
//! The service exposes transcription, logo detection and the optional
//! disclosure classifier. Models are opaque to this crate.

pub mod client;
pub mod error;
pub mod types;

pub use client::{MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use types::{DisclosureClassification, LogoDetection, TranscriptSegment, Transcription};
