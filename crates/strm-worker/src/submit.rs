//! Media submission: create the item, then queue its work.

use std::sync::Arc;

use strm_metadata::MetadataStore;
use strm_models::{Job, JobKind, MediaId, MediaItem, MediaStatus, MediaType};
use strm_queue::JobQueue;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Entry point for producers.
pub struct MediaSubmitter {
    metadata: Arc<dyn MetadataStore>,
    queue: Arc<dyn JobQueue>,
}

impl MediaSubmitter {
    pub fn new(metadata: Arc<dyn MetadataStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { metadata, queue }
    }

    /// Create `item` as `pending` and enqueue its transcode job.
    ///
    /// The item exists before the job does. If the enqueue fails the item is
    /// removed again so the submission can be repeated with the same id.
    pub async fn submit(&self, item: MediaItem, priority: i64) -> WorkerResult<Job> {
        if item.status != MediaStatus::Pending || !item.renditions.is_empty() {
            return Err(WorkerError::invalid_job(format!(
                "media {} must be submitted pending and without renditions",
                item.id
            )));
        }
        if item.source_key.is_empty() {
            return Err(WorkerError::invalid_job(format!(
                "media {} has no source",
                item.id
            )));
        }

        self.metadata.create(&item).await?;

        let mut job = Job::new(JobKind::transcode_for(item.media_type), item.id.clone())
            .with_priority(priority);
        match self.queue.enqueue(job.clone()).await {
            Ok(id) => job.id = id,
            Err(e) => {
                if let Err(cleanup) = self.metadata.delete(&item.id).await {
                    warn!(media_id = %item.id, "Failed to roll back media record: {}", cleanup);
                }
                return Err(e.into());
            }
        }

        info!(
            media_id = %item.id,
            job_id = %job.id,
            kind = job.kind.as_str(),
            priority,
            "Submitted media"
        );
        Ok(job)
    }

    /// Submit an uploaded file, detecting the media type from its name.
    pub async fn submit_upload(
        &self,
        title: &str,
        owner_id: &str,
        bucket: &str,
        key: &str,
        priority: i64,
    ) -> WorkerResult<Job> {
        let item = MediaItem::new(MediaId::new(), title, owner_id, MediaType::from_filename(key))
            .with_source(bucket, key);
        self.submit(item, priority).await
    }

    /// Queue thumbnail extraction for an existing video item.
    pub async fn submit_thumbnail(&self, id: &MediaId, priority: i64) -> WorkerResult<Job> {
        self.submit_video_task(JobKind::Thumbnail, id, priority).await
    }

    /// Queue audio-only renditions of an existing video item.
    pub async fn submit_audio_extract(&self, id: &MediaId, priority: i64) -> WorkerResult<Job> {
        self.submit_video_task(JobKind::AudioExtract, id, priority).await
    }

    async fn submit_video_task(
        &self,
        kind: JobKind,
        id: &MediaId,
        priority: i64,
    ) -> WorkerResult<Job> {
        let item = self.metadata.require(id).await?;
        if item.media_type != MediaType::Video {
            return Err(WorkerError::invalid_job(format!(
                "media {} is not a video",
                id
            )));
        }

        let mut job = Job::new(kind, id.clone()).with_priority(priority);
        job.id = self.queue.enqueue(job.clone()).await?;

        info!(media_id = %id, job_id = %job.id, kind = kind.as_str(), "Submitted media task");
        Ok(job)
    }
}
