//! ML service HTTP client.
//!
//! Every call is a single attempt. Retry decisions belong to the caller,
//! which uses [`MlError::is_transient`] to classify failures.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::types::{
    DisclosureClassification, DisclosureRequest, HealthResponse, LogoDetection, LogoDetections, Transcription,
};

/// Configuration for ML client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of ML service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ML_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Client for the ML service.
#[derive(Debug, Clone)]
pub struct MlClient {
    http: Client,
    base_url: String,
}

impl MlClient {
    pub fn new(config: MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(MlClientConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        match self.http.get(self.url("/health")).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = decode(response).await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Transcribe a WAV file.
    pub async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> MlResult<Transcription> {
        debug!(bytes = audio.len(), "Sending transcription request");
        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/wav")?;
        let form = Form::new().part("file", part);

        let response = self.http.post(self.url("/transcribe")).multipart(form).send().await?;
        let transcription: Transcription = decode(response).await?;

        if let Some(likelihood) = transcription.ad_likelihood {
            if !likelihood.is_finite() {
                return Err(MlError::InvalidResponse(format!("ad_likelihood is {likelihood}")));
            }
        }
        Ok(transcription)
    }

    /// Detect brand logos in one JPEG frame.
    pub async fn detect_logos(&self, image: Vec<u8>, timestamp: f64) -> MlResult<Vec<LogoDetection>> {
        let part = Part::bytes(image).file_name("frame.jpg").mime_str("image/jpeg")?;
        let form = Form::new()
            .part("file", part)
            .text("timestamp", format!("{timestamp:.3}"));

        let response = self.http.post(self.url("/detect-logos")).multipart(form).send().await?;
        let result: LogoDetections = decode(response).await?;

        if let Some(bad) = result.detections.iter().find(|d| !d.confidence.is_finite()) {
            return Err(MlError::InvalidResponse(format!(
                "confidence for {} is {}",
                bad.brand, bad.confidence
            )));
        }
        Ok(result.detections)
    }

    /// Ask the LLM classifier whether `text` carries an advertising disclosure.
    pub async fn classify_disclosure(&self, text: &str) -> MlResult<DisclosureClassification> {
        let response = self
            .http
            .post(self.url("/classify-disclosure"))
            .json(&DisclosureRequest { text })
            .send()
            .await?;
        let result: DisclosureClassification = decode(response).await?;

        if !result.probability.is_finite() {
            return Err(MlError::InvalidResponse(format!("probability is {}", result.probability)));
        }
        Ok(result)
    }
}

/// Map status, then parse the body. Undecodable bodies are [`MlError::Json`].
async fn decode<T: DeserializeOwned>(response: Response) -> MlResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MlError::from_status(status.as_u16(), body));
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
