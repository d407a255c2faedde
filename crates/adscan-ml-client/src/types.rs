//! ML service request/response types.

use serde::{Deserialize, Serialize};

/// One timed piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start, seconds
    pub start: f64,
    /// End, seconds
    pub end: f64,
    pub text: String,
}

/// Response of `POST /transcribe`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Service-side estimate that the speech is advertising
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_likelihood: Option<f64>,
}

/// One logo hit in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoDetection {
    pub brand: String,
    pub confidence: f64,
}

/// Response of `POST /detect-logos`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogoDetections {
    #[serde(default)]
    pub detections: Vec<LogoDetection>,
}

/// Request of `POST /classify-disclosure`.
#[derive(Debug, Clone, Serialize)]
pub struct DisclosureRequest<'a> {
    pub text: &'a str,
}

/// Response of `POST /classify-disclosure`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisclosureClassification {
    /// Probability that the text carries an advertising disclosure
    pub probability: f64,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Health check response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
