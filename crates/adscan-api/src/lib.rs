//! Axum HTTP ingress and status API.
//!
//! - `POST /api/jobs`, `POST /api/jobs/upload` create jobs
//! - `GET /api/jobs/:id`, `GET /api/jobs/:id/result` read them
//! - `/health`, `/ready`, `/metrics`

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
