//! ML client error types.

use thiserror::Error;

pub type MlResult<T> = Result<T, MlError>;

#[derive(Debug, Error)]
pub enum MlError {
    /// 408, 429 or 5xx from the service.
    #[error("ML service unavailable ({status}): {body}")]
    ServiceUnavailable { status: u16, body: String },

    /// Any other non-success status: the request itself is unacceptable.
    #[error("ML service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MlError {
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 408 || status == 429 || (500..600).contains(&status) {
            MlError::ServiceUnavailable { status, body }
        } else {
            MlError::Rejected { status, body }
        }
    }

    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            MlError::ServiceUnavailable { .. } => true,
            MlError::Network(e) => !e.is_builder() && !e.is_decode(),
            _ => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(MlError::from_status(status, "").is_transient(), "{status}");
        }
        for status in [400, 401, 404, 413, 422] {
            assert!(MlError::from_status(status, "").is_permanent(), "{status}");
        }
        assert!(MlError::InvalidResponse("bad".into()).is_permanent());
    }
}
