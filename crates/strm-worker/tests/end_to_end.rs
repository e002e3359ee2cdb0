//! Submission through the pool to published renditions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{HarnessBuilder, RAW};
use strm_metadata::MetadataStore;
use strm_models::{MediaStatus, MediaType, MAX_ATTEMPTS};
use strm_queue::{JobQueue, MemoryJobQueue, QueueConfig};
use strm_storage::ObjectStore;
use strm_worker::{JobHandler, MediaSubmitter, WorkerPool};
use tokio_util::sync::CancellationToken;

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_submitted_media_is_published() {
    let h = HarnessBuilder::new(MediaType::Video).build();
    let queue = Arc::new(MemoryJobQueue::new(QueueConfig::default()));
    let submitter = MediaSubmitter::new(h.metadata.clone(), queue.clone());

    for key in ["uploads/talk.mp3", "uploads/clip.mp4"] {
        h.store
            .inner
            .put(RAW, key, b"bytes".to_vec(), "application/octet-stream")
            .await
            .unwrap();
    }
    let audio = submitter
        .submit_upload("Talk", "u1", RAW, "uploads/talk.mp3", 0)
        .await
        .unwrap();
    let video = submitter
        .submit_upload("Clip", "u1", RAW, "uploads/clip.mp4", 5)
        .await
        .unwrap();

    let handler: Arc<dyn JobHandler> = h.pipeline.clone();
    let pool = WorkerPool::new(queue.clone(), handler, 2, Duration::from_millis(20));
    let cancel = CancellationToken::new();
    pool.start(cancel.clone());

    let metadata = h.metadata.clone();
    let ids = [audio.subject_id.clone(), video.subject_id.clone()];
    wait_until(|| {
        let metadata = metadata.clone();
        let ids = ids.clone();
        async move {
            for id in &ids {
                match metadata.get(id).await {
                    Ok(Some(item)) if item.status == MediaStatus::Completed => {}
                    _ => return false,
                }
            }
            true
        }
    })
    .await;

    cancel.cancel();
    pool.wait().await;

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.in_flight_len().await.unwrap(), 0);

    let audio_item = h.metadata.require(&audio.subject_id).await.unwrap();
    assert_eq!(audio_item.renditions.len(), 3);
    let video_item = h.metadata.require(&video.subject_id).await.unwrap();
    assert_eq!(video_item.renditions.len(), 4);

    let published = h.published();
    assert!(published.contains(&audio_item.master_manifest_key()));
    assert!(published.contains(&video_item.master_manifest_key()));
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn test_unprocessable_media_is_dead_lettered() {
    let h = HarnessBuilder::new(MediaType::Audio).build();
    let queue = Arc::new(MemoryJobQueue::new(QueueConfig::default()));
    let submitter = MediaSubmitter::new(h.metadata.clone(), queue.clone());

    // The source object was never uploaded.
    let job = submitter
        .submit_upload("Lost", "u1", RAW, "uploads/lost.mp3", 0)
        .await
        .unwrap();

    let handler: Arc<dyn JobHandler> = h.pipeline.clone();
    let pool = WorkerPool::new(queue.clone(), handler, 1, Duration::from_millis(20));
    let cancel = CancellationToken::new();
    pool.start(cancel.clone());

    let dead = queue.clone();
    wait_until(|| {
        let dead = dead.clone();
        async move { dead.dead_letter_len().await.unwrap() == 1 }
    })
    .await;

    cancel.cancel();
    pool.wait().await;

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead[0].id, job.id);
    assert_eq!(dead[0].attempts, MAX_ATTEMPTS);

    let item = h.metadata.require(&job.subject_id).await.unwrap();
    assert_eq!(item.status, MediaStatus::Failed);
    assert!(item.renditions.is_empty());
}
