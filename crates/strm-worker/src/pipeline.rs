//! Per-job processing pipeline.
//!
//! A transcode job moves its media item `pending -> processing`, fetches the
//! source into a scratch directory, and then for each configured profile
//! transcodes, publishes the files and records the rendition. The master
//! playlist is published after the last profile, and only then does the item
//! become `completed`. Any failure marks the item `failed` and is returned to
//! the caller so the job can be nacked.
//!
//! Thumbnail and audio-extraction jobs only publish extra objects for an
//! existing video; they never change the item's status or renditions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use strm_media::{
    content_type_for, generate_thumbnail, master_manifest, master_manifest_under, AudioOutput,
    CommandExecutor, MediaError, MediaProber, OutputStrategy,
};
use strm_metadata::MetadataStore;
use strm_models::{Job, JobKind, MediaItem, MediaStatus, MediaType, Rendition, TranscodeProfile};
use strm_storage::ObjectStore;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Payload key overriding the item's source bucket.
pub const PARAM_SOURCE_BUCKET: &str = "source_bucket";
/// Payload key overriding the item's source key.
pub const PARAM_SOURCE_KEY: &str = "source_key";
/// Payload key selecting audio packaging (`hls` or `progressive`).
pub const PARAM_OUTPUT: &str = "output";

const MANIFEST_CONTENT_TYPE: &str = "application/x-mpegURL";
const MASTER_MANIFEST_FILE: &str = "master.m3u8";

/// Runs one dequeued job to completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process `job`. Cancelling `cancel` aborts a running transcoder.
    async fn handle(&self, job: &Job, cancel: &CancellationToken) -> WorkerResult<()>;
}

/// The transcoding pipeline and its collaborators.
pub struct TranscodePipeline {
    config: WorkerConfig,
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    executor: Arc<dyn CommandExecutor>,
    prober: Arc<dyn MediaProber>,
}

impl TranscodePipeline {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        executor: Arc<dyn CommandExecutor>,
        prober: Arc<dyn MediaProber>,
    ) -> Self {
        Self {
            config,
            store,
            metadata,
            executor,
            prober,
        }
    }

    /// Run a job under the configured job timeout.
    ///
    /// The timeout cancels a child of `cancel`, so an expired job stops its
    /// transcoder and fails like any other error.
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> WorkerResult<()> {
        let logger = JobLogger::new(job);
        let span = logger.create_span();

        async {
            let ctx = cancel.child_token();
            let timeout = self.config.job_timeout;
            let deadline = ctx.clone();
            let timer = tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        deadline.cancel();
                        true
                    }
                    _ = deadline.cancelled() => false,
                }
            });

            let result = match job.kind {
                JobKind::VideoTranscode | JobKind::AudioTranscode => {
                    self.transcode(job, &logger, &ctx).await
                }
                JobKind::Thumbnail => self.thumbnail(job, &logger, &ctx).await,
                JobKind::AudioExtract => self.extract_audio(job, &logger, &ctx).await,
            };

            ctx.cancel();
            let timed_out = timer.await.unwrap_or(false);

            result.map_err(|e| {
                if timed_out && e.is_cancelled() {
                    WorkerError::Timeout(timeout)
                } else {
                    e
                }
            })
        }
        .instrument(span)
        .await
    }

    async fn transcode(
        &self,
        job: &Job,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> WorkerResult<()> {
        let item = self.metadata.require(&job.subject_id).await?;

        // A redelivered job for finished work has nothing left to do.
        if item.status == MediaStatus::Completed {
            logger.log_warning("media already completed, skipping");
            return Ok(());
        }

        logger.log_start(&format!(
            "{} {} (attempt {})",
            item.media_type.as_str(),
            item.title,
            job.attempts + 1
        ));

        self.metadata
            .update_status(&item.id, MediaStatus::Processing)
            .await?;

        // From here on every error must leave the item `failed`.
        let result: WorkerResult<usize> = async {
            self.metadata.clear_renditions(&item.id).await?;
            let count = self.produce(job, &item, logger, cancel).await?;
            self.metadata
                .update_status(&item.id, MediaStatus::Completed)
                .await?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                logger.log_completion(&format!("{} renditions published", count));
                Ok(())
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                if let Some(stderr) = error_stderr(&e) {
                    logger.log_error(&format!("transcoder output:\n{}", stderr));
                }
                self.mark_failed(&item, logger).await;
                Err(e)
            }
        }
    }

    /// Produce, publish and record every rendition. Returns how many were
    /// produced.
    async fn produce(
        &self,
        job: &Job,
        item: &MediaItem,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> WorkerResult<usize> {
        let profiles = self.config.profiles_for(item.media_type);
        if profiles.is_empty() {
            return Err(WorkerError::config_error(format!(
                "no {} profiles configured",
                item.media_type.as_str()
            )));
        }
        let expected = JobKind::transcode_for(item.media_type);
        if job.kind != expected {
            return Err(WorkerError::invalid_job(format!(
                "{} job for {} media",
                job.kind.as_str(),
                item.media_type.as_str()
            )));
        }

        let scratch = self.scratch_dir(job).await?;
        let source = self.fetch_source(job, item, scratch.path(), cancel).await?;

        let info = self.prober.probe(&source).await?;
        if item.media_type == MediaType::Video && !info.has_video() {
            return Err(WorkerError::Media(MediaError::invalid_media(
                "source has no video stream",
            )));
        }
        if info.duration > 0.0 {
            self.metadata.set_duration(&item.id, info.duration).await?;
        }

        let audio_output = match job.param(PARAM_OUTPUT) {
            Some(value) => value.parse::<AudioOutput>()?,
            None => self.config.audio_output,
        };
        let strategy = OutputStrategy::select(item.media_type, audio_output);
        let output_root = scratch.path().join("out");

        let mut renditions: Vec<Rendition> = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let rendition = self
                .publish_profile(
                    strategy,
                    profile,
                    &source,
                    &output_root,
                    item.id.as_str(),
                    logger,
                    cancel,
                )
                .await?;
            self.metadata.append_rendition(&item.id, &rendition).await?;
            renditions.push(rendition);
        }

        let manifest = master_manifest(&item.id, &renditions);
        self.store
            .put(
                &self.config.processed_bucket,
                &item.id.master_manifest_key(),
                manifest.into_bytes(),
                MANIFEST_CONTENT_TYPE,
            )
            .await?;

        Ok(renditions.len())
    }

    /// Transcode one profile and publish its files below `root`.
    #[allow(clippy::too_many_arguments)]
    async fn publish_profile(
        &self,
        strategy: OutputStrategy,
        profile: &TranscodeProfile,
        source: &Path,
        output_root: &Path,
        root: &str,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> WorkerResult<Rendition> {
        let plan = strategy.plan(profile, source, output_root, self.config.segment_duration)?;
        tokio::fs::create_dir_all(&plan.dir).await?;

        let started = Instant::now();
        self.executor.execute(&plan.args, cancel).await?;
        metrics::record_transcode(&profile.name, strategy.as_str(), started.elapsed());

        let outputs = plan.outputs().await?;
        for file in &outputs {
            let key = plan.object_key_under(root, file);
            self.store
                .upload_file(
                    &self.config.processed_bucket,
                    &key,
                    file,
                    content_type_for(file),
                    cancel,
                )
                .await?;
        }

        let rendition = plan.rendition_under(root);
        logger.log_progress(&format!(
            "rendition {} published ({} files, {} bps)",
            rendition.name,
            outputs.len(),
            rendition.bitrate
        ));
        Ok(rendition)
    }

    /// Publish audio-only renditions of a video and their master playlist
    /// under `{media_id}/audio/`. The item's status and renditions are left
    /// alone.
    async fn extract_audio(
        &self,
        job: &Job,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> WorkerResult<()> {
        let item = self.metadata.require(&job.subject_id).await?;
        if item.media_type != MediaType::Video {
            return Err(WorkerError::invalid_job("audio extraction requires video media"));
        }
        let profiles = &self.config.audio_profiles;
        if profiles.is_empty() {
            return Err(WorkerError::config_error("no audio profiles configured"));
        }

        logger.log_start("audio extraction");

        let scratch = self.scratch_dir(job).await?;
        let source = self.fetch_source(job, &item, scratch.path(), cancel).await?;

        let info = self.prober.probe(&source).await?;
        if !info.has_audio() {
            return Err(WorkerError::Media(MediaError::invalid_media(
                "source has no audio stream",
            )));
        }

        let root = item.id.audio_root();
        let output_root = scratch.path().join("audio");
        let mut renditions = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let rendition = self
                .publish_profile(
                    OutputStrategy::AudioHls,
                    profile,
                    &source,
                    &output_root,
                    &root,
                    logger,
                    cancel,
                )
                .await?;
            renditions.push(rendition);
        }

        let key = format!("{}/{}", root, MASTER_MANIFEST_FILE);
        self.store
            .put(
                &self.config.processed_bucket,
                &key,
                master_manifest_under(&root, &renditions).into_bytes(),
                MANIFEST_CONTENT_TYPE,
            )
            .await?;

        logger.log_completion(&format!(
            "{} audio renditions published to {}",
            renditions.len(),
            root
        ));
        Ok(())
    }

    async fn thumbnail(
        &self,
        job: &Job,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> WorkerResult<()> {
        let item = self.metadata.require(&job.subject_id).await?;
        if item.media_type != MediaType::Video {
            return Err(WorkerError::invalid_job("thumbnails require video media"));
        }

        logger.log_start("thumbnail");

        let scratch = self.scratch_dir(job).await?;
        let source = self.fetch_source(job, &item, scratch.path(), cancel).await?;

        let output = scratch.path().join("thumbnail.jpg");
        generate_thumbnail(self.executor.as_ref(), &source, &output, cancel).await?;

        let key = item.id.thumbnail_key();
        self.store
            .upload_file(
                &self.config.processed_bucket,
                &key,
                &output,
                content_type_for(&output),
                cancel,
            )
            .await?;

        logger.log_completion(&format!("thumbnail published to {}", key));
        Ok(())
    }

    /// Scratch directory for one job, removed when dropped.
    async fn scratch_dir(&self, job: &Job) -> WorkerResult<TempDir> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", job.id))
            .tempdir_in(&self.config.work_dir)?;
        Ok(dir)
    }

    /// Download the job's source into `dir`.
    async fn fetch_source(
        &self,
        job: &Job,
        item: &MediaItem,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> WorkerResult<PathBuf> {
        let bucket = job
            .param(PARAM_SOURCE_BUCKET)
            .unwrap_or(item.source_bucket.as_str());
        let key = job.param(PARAM_SOURCE_KEY).unwrap_or(item.source_key.as_str());
        if bucket.is_empty() || key.is_empty() {
            return Err(WorkerError::invalid_job(format!(
                "media {} has no source location",
                item.id
            )));
        }

        let file_name = match Path::new(key).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("source.{}", ext),
            None => "source".to_string(),
        };
        let path = dir.join(file_name);

        self.store.download_to(bucket, key, &path, cancel).await?;
        Ok(path)
    }

    async fn mark_failed(&self, item: &MediaItem, logger: &JobLogger) {
        if let Err(e) = self
            .metadata
            .update_status(&item.id, MediaStatus::Failed)
            .await
        {
            logger.log_warning(&format!("could not mark media failed: {}", e));
        }
    }
}

fn error_stderr(error: &WorkerError) -> Option<&str> {
    match error {
        WorkerError::Media(e) => e.stderr(),
        _ => None,
    }
}

#[async_trait]
impl JobHandler for TranscodePipeline {
    async fn handle(&self, job: &Job, cancel: &CancellationToken) -> WorkerResult<()> {
        self.run(job, cancel).await
    }
}

