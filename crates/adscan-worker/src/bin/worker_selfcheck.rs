use std::path::Path;

use adscan_media::{check_ffmpeg, check_ffprobe, check_ytdlp};
use adscan_ml_client::MlClient;
use adscan_worker::{PipelineConfig, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;

    for (tool, check) in [
        ("ffmpeg", check_ffmpeg as fn() -> _),
        ("ffprobe", check_ffprobe),
        ("yt-dlp", check_ytdlp),
    ] {
        let path = check().map_err(|e| anyhow::anyhow!("{} not available: {}", tool, e))?;
        println!("worker-selfcheck: {} at {}", tool, path.display());
    }

    PipelineConfig::from_env().validate()?;
    ensure_env_present(&["REDIS_URL"])?;

    if std::env::var("ML_SERVICE_URL").is_ok() {
        let ml = MlClient::from_env()?;
        if !ml.health_check().await? {
            return Err(anyhow::anyhow!("ML service reported unhealthy"));
        }
        println!("worker-selfcheck: ML service healthy");
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
