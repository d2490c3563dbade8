//! Wires a [`archive_jobqueue::Worker`] to an in-process [`archive_core::Runtime`]
//! and registers a small handler chain — metadata, then download, then audio
//! extraction — the same three queues `SPEC_FULL.md` §4.7 calls out by name
//! from the original's scraper/downloader/transcoder pipeline. Everything
//! those handlers would actually do (scraping, invoking an external
//! downloader, transcoding) is out of scope; each handler here just logs and
//! chains to the next queue.

use std::sync::Arc;

use anyhow::Result;
use archive_core::Runtime;
use archive_jobqueue::{ensure_schema, handler, queue_names, Job, Worker};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
    ensure_schema(&pool).await?;

    let worker = Worker::new(pool.clone());

    worker
        .register(queue_names::VIDEO_UPDATE_METADATA, handler(update_metadata))
        .await?;
    worker.register(queue_names::VIDEO_DOWNLOAD, handler(download_video)).await?;
    worker
        .register(queue_names::VIDEO_EXTRACT_AUDIO, handler(extract_audio))
        .await?;

    let runtime = Arc::new(
        Runtime::builder()
            .with_db(pool.clone())
            .with_job_queue(worker.clone())
            .build(),
    );

    let mut conn = pool.acquire().await?;
    worker
        .add(
            &mut conn,
            runtime.now().await?,
            queue_names::VIDEO_UPDATE_METADATA,
            "dQw4w9WgXcQ".to_string(),
            None,
            None,
            None,
        )
        .await?;
    drop(conn);

    info!("enqueued video_update_metadata for dQw4w9WgXcQ, draining queue");

    // Drain greedily: a one-shot demo doesn't need the cancellation-aware
    // run loop, just enough ticks to walk the chain to completion.
    while worker.tick(&runtime).await? {}

    info!("queue drained");

    Ok(())
}

async fn update_metadata(runtime: Arc<Runtime>, job: Job) -> Result<String> {
    info!(video_id = %job.payload, "fetched video metadata");

    let mut conn = runtime.db()?.acquire().await?;
    runtime
        .job_queue()?
        .enqueue(&mut conn, queue_names::VIDEO_DOWNLOAD, job.payload, None, None, None)
        .await?;

    Ok("metadata updated".to_string())
}

async fn download_video(runtime: Arc<Runtime>, job: Job) -> Result<String> {
    info!(video_id = %job.payload, "downloaded video");

    let mut conn = runtime.db()?.acquire().await?;
    runtime
        .job_queue()?
        .enqueue(&mut conn, queue_names::VIDEO_EXTRACT_AUDIO, job.payload, None, None, None)
        .await?;

    Ok("video downloaded".to_string())
}

async fn extract_audio(_runtime: Arc<Runtime>, job: Job) -> Result<String> {
    info!(video_id = %job.payload, "extracted audio track");
    Ok("audio extracted".to_string())
}
