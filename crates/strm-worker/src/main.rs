//! Transcoding worker binary.

use std::sync::Arc;

use anyhow::Context;
use strm_media::{FfmpegConfig, FfmpegExecutor, FfprobeProber};
use strm_metadata::{RedisMetadataConfig, RedisMetadataStore};
use strm_queue::{QueueConfig, RedisJobQueue};
use strm_storage::{S3Client, S3Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use strm_worker::{TranscodePipeline, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    strm_worker::logging::init_tracing();

    info!("Starting strm-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        strm_worker::metrics::install_exporter(port)?;
        info!("Serving metrics on port {}", port);
    }

    let queue_config = QueueConfig::from_env();
    let queue = RedisJobQueue::new(queue_config.clone()).context("Failed to create job queue")?;
    queue.ping().await.context("Redis not reachable")?;

    let metadata = RedisMetadataStore::new(RedisMetadataConfig {
        redis_url: queue_config.redis_url.clone(),
        key_prefix: queue_config.key_prefix.clone(),
    })
    .context("Failed to create metadata store")?;

    let s3_config = S3Config::from_env()?;
    let store = S3Client::new(&s3_config).await?;
    if let Err(e) = store.check_connectivity(&config.processed_bucket).await {
        warn!("Object store check failed: {}", e);
    }

    let ffmpeg_config = FfmpegConfig::from_env();
    let executor = FfmpegExecutor::new(ffmpeg_config.clone());
    let prober = FfprobeProber::new(ffmpeg_config);
    executor.check()?;
    prober.check()?;

    let pipeline = TranscodePipeline::new(
        config.clone(),
        Arc::new(store),
        Arc::new(metadata),
        Arc::new(executor),
        Arc::new(prober),
    );

    let pool = WorkerPool::from_config(&config, Arc::new(queue), Arc::new(pipeline));
    let shutdown = CancellationToken::new();
    pool.start(shutdown.clone());
    pool.start_recovery(
        config.recovery_interval,
        config.recovery_min_idle,
        shutdown.clone(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, draining in-flight jobs");
    shutdown.cancel();

    if tokio::time::timeout(config.shutdown_timeout, pool.wait())
        .await
        .is_err()
    {
        warn!(
            "Jobs still running after {:?}, aborting",
            config.shutdown_timeout
        );
        pool.abort();
        pool.wait().await;
    }

    Ok(())
}
