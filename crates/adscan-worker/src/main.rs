//! Advertising-detection worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adscan_media::{FetcherRegistry, HttpFetcherConfig, YtDlpConfig};
use adscan_ml_client::MlClient;
use adscan_queue::{DispatchQueue, QueueConfig};
use adscan_storage::{connect, ArtifactStoreConfig};
use adscan_store::{JobStore, RedisJobStore};
use adscan_worker::{Adapters, JobExecutor, PipelineConfig, PipelineCoordinator, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("adscan=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting adscan-worker");

    if let Err(e) = run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> WorkerResult<()> {
    let worker_config = WorkerConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", worker_config);

    queue_config.validate()?;
    worker_config.validate(queue_config.liveness_timeout)?;
    pipeline_config.validate()?;

    if let Ok(addr) = std::env::var("WORKER_METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
                Ok(()) => info!("Metrics exporter listening on {}", addr),
                Err(e) => warn!("Failed to install metrics exporter: {}", e),
            },
            Err(e) => warn!("Ignoring invalid WORKER_METRICS_ADDR {}: {}", addr, e),
        }
    }

    let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::from_env()?);
    store.ping().await?;

    let artifacts = connect(ArtifactStoreConfig::from_env()?).await?;
    let ml = MlClient::from_env()?;
    match ml.health_check().await {
        Ok(true) => info!("ML service is healthy"),
        _ => warn!("ML service health check failed; stages will retry against it"),
    }

    let fetchers = FetcherRegistry::with_defaults(YtDlpConfig::from_env(), HttpFetcherConfig::default())?;
    let adapters = Adapters::production(&pipeline_config, fetchers, artifacts.clone(), ml).await?;

    tokio::fs::create_dir_all(&worker_config.work_dir).await?;
    let coordinator = Arc::new(PipelineCoordinator::new(
        store.clone(),
        artifacts,
        adapters,
        pipeline_config,
        worker_config.work_dir.clone(),
    ));
    let queue = DispatchQueue::new(store, queue_config);
    let executor = Arc::new(JobExecutor::new(worker_config, queue, coordinator));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run().await;
    Ok(())
}
