//! Job ingress and status handlers.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use adscan_models::{AnalysisResult, ArtifactRef, JobId, JobSpec, JobStatus, JobView, Platform};
use adscan_storage::ArtifactKey;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::validate_media_url;
use crate::state::AppState;

/// `POST /api/jobs` body.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[validate(length(min = 1, max = 2048))]
    pub input_url: String,
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Submit a URL job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    if request.platform == Some(Platform::FileUpload) {
        return Err(ApiError::Validation(
            "file_upload jobs must be submitted through /api/jobs/upload".to_string(),
        ));
    }

    let url = validate_media_url(&request.input_url).map_err(|e| ApiError::Validation(e.to_string()))?;
    let spec = JobSpec::from_url(url, request.platform)?;
    let job_id = state.queue.submit(spec).await?;

    Ok(created(job_id))
}

/// Store an uploaded media file and submit a `file_upload` job for it.
pub async fn upload_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                file = Some((file_name, content_type, data));
            }
            "platform" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid platform field: {e}")))?;
                let platform: Platform = raw.parse().map_err(ApiError::Validation)?;
                if platform != Platform::FileUpload {
                    return Err(ApiError::Validation(format!(
                        "uploads must use platform file_upload, got {platform}"
                    )));
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, data) = file.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    let key = ArtifactKey::upload(&Uuid::new_v4().to_string(), &file_name)?;
    let size = data.len();
    state.artifacts.put(&key, data.to_vec(), &content_type).await?;
    metrics::record_upload_bytes(size);
    info!(key = %key, size, "Stored upload");

    let spec = JobSpec::from_upload(key.as_str())?;
    let job_id = state.queue.submit(spec).await?;

    Ok(created(job_id))
}

/// Public projection of a job.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobView>> {
    let job = state.store.get(&parse_job_id(&job_id)?).await?;
    Ok(Json(job.view()))
}

/// The analysis result of a completed job; 409 while it is not completed.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<AnalysisResult>> {
    let job = state.store.get(&parse_job_id(&job_id)?).await?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::conflict(format!("job {} is {}", job.id, job.status.as_str())));
    }
    let result_path = job
        .result_path
        .ok_or_else(|| ApiError::internal(format!("completed job {} has no result path", job.id)))?;

    let data = state.artifacts.get(&ArtifactRef::new(result_path)).await?;
    let result: AnalysisResult = serde_json::from_slice(&data)
        .map_err(|e| ApiError::internal(format!("stored result is not valid: {e}")))?;
    Ok(Json(result))
}

fn created(job_id: JobId) -> (StatusCode, Json<JobCreatedResponse>) {
    (
        StatusCode::CREATED,
        Json(JobCreatedResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    )
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if is_valid_job_id(raw) {
        Ok(JobId::from_string(raw))
    } else {
        Err(ApiError::bad_request("Invalid job ID format"))
    }
}

/// 8 to 64 ASCII alphanumerics or hyphens.
fn is_valid_job_id(id: &str) -> bool {
    (8..=64).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_job_id() {
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_job_id("short"));
        assert!(!is_valid_job_id("../../etc/passwd"));
        assert!(!is_valid_job_id(&"a".repeat(65)));
    }
}
