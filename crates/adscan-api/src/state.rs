//! Application state.

use std::sync::Arc;

use adscan_queue::{DispatchQueue, QueueConfig};
use adscan_storage::{connect, ArtifactStore, ArtifactStoreConfig};
use adscan_store::{JobStore, RedisJobStore};

use crate::config::ApiConfig;
use crate::middleware::IpRateLimiter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: DispatchQueue,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        queue_config: QueueConfig,
    ) -> Self {
        let queue = DispatchQueue::new(Arc::clone(&store), queue_config);
        let rate_limiter = IpRateLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        Self {
            config,
            store,
            queue,
            artifacts,
            rate_limiter,
        }
    }

    /// Connect to the Redis job store and the configured artifact backend.
    pub async fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let queue_config = QueueConfig::from_env();
        queue_config.validate()?;
        let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::from_env()?);
        let artifacts = connect(ArtifactStoreConfig::from_env()?).await?;
        Ok(Self::new(config, store, artifacts, queue_config))
    }
}
