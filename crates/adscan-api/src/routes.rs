//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{create_job, get_job, get_job_result, health, ready, upload_job};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/result", get(get_job_result))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size));

    let upload_routes = Router::new()
        .route("/jobs/upload", post(upload_job))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_size));

    let api_routes = Router::new()
        .merge(job_routes)
        .merge(upload_routes)
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use adscan_models::{
        AnalysisResult, Expected, JobId, JobStatus, JobUpdate, Platform, StageName, WorkerId,
    };
    use adscan_queue::QueueConfig;
    use adscan_storage::{put_json, ArtifactKey, ArtifactStore, LocalArtifactStore};
    use adscan_store::{JobStore, MemoryJobStore};

    use super::*;
    use crate::config::ApiConfig;

    struct TestApp {
        state: AppState,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let artifacts: Arc<dyn ArtifactStore> =
                Arc::new(LocalArtifactStore::new(dir.path()).await.unwrap());
            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let state = AppState::new(ApiConfig::default(), store, artifacts, QueueConfig::default());
            Self { state, _dir: dir }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = create_router(self.state.clone(), None).oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }
    }

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "adscan-test-boundary";
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: video/mp4\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Request::post("/api/jobs/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = app.get("/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["job_store"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_job_detects_platform() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post_json("/api/jobs", json!({"input_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");

        let job_id = body["job_id"].as_str().unwrap().to_string();
        let (status, job) = app.get(&format!("/api/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["platform"], "youtube");
        assert_eq!(job["input_type"], "url");
        assert!(job.get("lease").is_none());
        assert!(job.get("version").is_none());
    }

    #[tokio::test]
    async fn test_create_job_rejects_bad_input() {
        let app = TestApp::new().await;

        let (status, _) = app
            .post_json("/api/jobs", json!({"input_url": "http://169.254.169.254/latest/meta-data"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.post_json("/api/jobs", json!({"input_url": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post_json(
                "/api/jobs",
                json!({"input_url": "https://example.com/a.mp4", "platform": "file_upload"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.state.store.list_by_status(JobStatus::Pending, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_job_ids() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/jobs/00000000-0000-0000-0000-000000000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.get("/api/jobs/bad!id").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_result_conflicts_until_completed() {
        let app = TestApp::new().await;
        let (_, body) = app
            .post_json("/api/jobs", json!({"input_url": "https://t.me/channel/42"}))
            .await;
        let job_id = JobId::from_string(body["job_id"].as_str().unwrap());

        let (status, _) = app.get(&format!("/api/jobs/{job_id}/result")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let worker = WorkerId::from_string("worker-1");
        app.state.queue.poll(&worker, 1).await.unwrap();
        let result = AnalysisResult {
            job_id: job_id.clone(),
            platform: Platform::Telegram,
            visual_score: 0.0,
            audio_score: 0.0,
            text_score: 0.0,
            disclosure_score: 0.0,
            confidence_score: 0.0,
            has_advertising: false,
            detected_brands: Vec::new(),
            detected_keywords: Default::default(),
            transcript: String::new(),
            disclosure_markers: Default::default(),
            frames_analyzed: 0,
            analyzed_at: chrono::Utc::now(),
        };
        let key = ArtifactKey::stage(&job_id, StageName::PersistReport, "result.json").unwrap();
        put_json(app.state.artifacts.as_ref(), &key, &result).await.unwrap();
        app.state
            .store
            .transition(
                &job_id,
                Expected::status(JobStatus::Processing).owned_by(worker),
                JobStatus::Completed,
                JobUpdate::complete(key.as_str(), None),
            )
            .await
            .unwrap();

        let (status, body) = app.get(&format!("/api/jobs/{job_id}/result")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job_id"], job_id.as_str());
        assert_eq!(body["has_advertising"], false);
    }

    #[tokio::test]
    async fn test_upload_creates_file_job() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(multipart(&[
                ("platform", None, b"file_upload"),
                ("file", Some("my clip.mp4"), b"\x00\x00\x00\x18ftypmp42"),
            ]))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let job_id = body["job_id"].as_str().unwrap();
        let (_, job) = app.get(&format!("/api/jobs/{job_id}")).await;
        assert_eq!(job["platform"], "file_upload");
        let media_path = job["media_path"].as_str().unwrap();
        assert!(media_path.starts_with("uploads/"));
        assert!(media_path.ends_with("/my_clip.mp4"));

        let stored = app
            .state
            .artifacts
            .get(&adscan_models::ArtifactRef::new(media_path))
            .await
            .unwrap();
        assert_eq!(stored, b"\x00\x00\x00\x18ftypmp42");
    }

    #[tokio::test]
    async fn test_upload_requires_non_empty_file() {
        let app = TestApp::new().await;
        let (status, _) = app.send(multipart(&[("platform", None, b"file_upload")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.send(multipart(&[("file", Some("empty.mp4"), b"")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(multipart(&[("platform", None, b"youtube"), ("file", Some("a.mp4"), b"data")]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_security_headers_and_request_id() {
        let app = TestApp::new().await;
        let response = create_router(app.state.clone(), None)
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }
}
