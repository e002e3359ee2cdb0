//! Test doubles for the pipeline's collaborators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strm_media::{CommandExecutor, MediaError, MediaInfo, MediaProber, MediaResult};
use strm_metadata::{MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore};
use strm_models::{MediaId, MediaItem, MediaStatus, MediaType, Rendition};
use strm_storage::{MemoryObjectStore, ObjectInfo, ObjectStore, StorageError, StorageResult};
use strm_worker::{TranscodePipeline, WorkerConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const RAW: &str = "raw";
pub const PROCESSED: &str = "processed";

/// How the fake transcoder behaves on a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Exit non-zero on the n-th call (1-based)
    FailOn(usize),
    /// Block until cancelled
    Hang,
}

/// Stands in for FFmpeg: writes the files the arguments ask for.
pub struct FakeExecutor {
    behavior: Behavior,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, args: &[String], cancel: &CancellationToken) -> MediaResult<()> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(args.to_vec());
            calls.len()
        };

        match self.behavior {
            Behavior::FailOn(n) if n == call => {
                return Err(MediaError::ffmpeg_failed(
                    "FFmpeg exited with exit status: 1",
                    Some("Invalid data found when processing input".to_string()),
                    Some(1),
                ));
            }
            Behavior::Hang => {
                cancel.cancelled().await;
                return Err(MediaError::Cancelled);
            }
            _ => {}
        }

        let output = PathBuf::from(args.last().expect("output path"));
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(pattern) = arg_after(args, "-hls_segment_filename") {
            for index in ["0000", "0001"] {
                tokio::fs::write(pattern.replace("%04d", index), b"segment").await?;
            }
        }
        tokio::fs::write(&output, b"#EXTM3U\n").await?;
        Ok(())
    }
}

/// Returns a fixed probe result.
pub struct FakeProber {
    pub info: MediaInfo,
}

impl FakeProber {
    pub fn for_type(media_type: MediaType) -> Self {
        let mut info = MediaInfo {
            duration: 42.0,
            audio_codec: Some("aac".to_string()),
            ..Default::default()
        };
        if media_type == MediaType::Video {
            info.video_codec = Some("h264".to_string());
            info.width = Some(1920);
            info.height = Some(1080);
            info.fps = Some(30.0);
        }
        Self { info }
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !tokio::fs::try_exists(path).await? {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        Ok(self.info.clone())
    }
}

/// Memory store whose uploads under `fail_prefix` fail while armed.
pub struct FailingStore {
    pub inner: MemoryObjectStore,
    fail_prefix: String,
    armed: AtomicBool,
}

impl FailingStore {
    pub fn new(fail_prefix: &str) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            fail_prefix: fail_prefix.to_string(),
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        if self.armed.load(Ordering::SeqCst) && key.starts_with(&self.fail_prefix) {
            return Err(StorageError::upload_failed(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.check(key)?;
        self.inner.put(bucket, key, data, content_type).await
    }

    async fn download_to(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        self.inner.download_to(bucket, key, path, cancel).await
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        self.check(key)?;
        self.inner
            .upload_file(bucket, key, path, content_type, cancel)
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.inner.list(bucket, prefix).await
    }
}

/// Memory metadata store whose `clear_renditions` can be made to fail.
pub struct FlakyMetadata {
    pub inner: MemoryMetadataStore,
    fail_clear: AtomicBool,
}

impl FlakyMetadata {
    pub fn new(fail_clear: bool) -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_clear: AtomicBool::new(fail_clear),
        }
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn create(&self, item: &MediaItem) -> MetadataResult<()> {
        self.inner.create(item).await
    }

    async fn get(&self, id: &MediaId) -> MetadataResult<Option<MediaItem>> {
        self.inner.get(id).await
    }

    async fn update_status(&self, id: &MediaId, status: MediaStatus) -> MetadataResult<()> {
        self.inner.update_status(id, status).await
    }

    async fn append_rendition(&self, id: &MediaId, rendition: &Rendition) -> MetadataResult<()> {
        self.inner.append_rendition(id, rendition).await
    }

    async fn clear_renditions(&self, id: &MediaId) -> MetadataResult<()> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(MetadataError::connection_failed("redis went away"));
        }
        self.inner.clear_renditions(id).await
    }

    async fn set_duration(&self, id: &MediaId, duration: f64) -> MetadataResult<()> {
        self.inner.set_duration(id, duration).await
    }

    async fn delete(&self, id: &MediaId) -> MetadataResult<()> {
        self.inner.delete(id).await
    }

    async fn list_by_owner(&self, owner: &str) -> MetadataResult<Vec<MediaItem>> {
        self.inner.list_by_owner(owner).await
    }
}

/// A pipeline wired to in-memory collaborators.
pub struct Harness {
    pub work_dir: TempDir,
    pub store: Arc<FailingStore>,
    pub metadata: Arc<FlakyMetadata>,
    pub executor: Arc<FakeExecutor>,
    pub pipeline: Arc<TranscodePipeline>,
}

pub struct HarnessBuilder {
    media_type: MediaType,
    behavior: Behavior,
    fail_prefix: String,
    fail_clear: bool,
    prober: Option<FakeProber>,
    configure: Box<dyn FnOnce(&mut WorkerConfig)>,
}

impl HarnessBuilder {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            behavior: Behavior::Succeed,
            fail_prefix: "\u{0}never".to_string(),
            fail_clear: false,
            prober: None,
            configure: Box::new(|_| {}),
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn fail_uploads_under(mut self, prefix: &str) -> Self {
        self.fail_prefix = prefix.to_string();
        self
    }

    pub fn fail_clearing_renditions(mut self) -> Self {
        self.fail_clear = true;
        self
    }

    pub fn prober(mut self, prober: FakeProber) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut WorkerConfig) + 'static) -> Self {
        self.configure = Box::new(f);
        self
    }

    pub fn build(self) -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig {
            work_dir: work_dir.path().join("scratch"),
            processed_bucket: PROCESSED.to_string(),
            job_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        (self.configure)(&mut config);

        let store = Arc::new(FailingStore::new(&self.fail_prefix));
        let metadata = Arc::new(FlakyMetadata::new(self.fail_clear));
        let executor = Arc::new(FakeExecutor::new(self.behavior));
        let prober = Arc::new(
            self.prober
                .unwrap_or_else(|| FakeProber::for_type(self.media_type)),
        );

        let pipeline = Arc::new(TranscodePipeline::new(
            config,
            store.clone(),
            metadata.clone(),
            executor.clone(),
            prober,
        ));

        Harness {
            work_dir,
            store,
            metadata,
            executor,
            pipeline,
        }
    }
}

impl Harness {
    /// Store a source object and create its pending media item.
    pub async fn seed(&self, id: &str, media_type: MediaType) -> MediaItem {
        let key = match media_type {
            MediaType::Video => format!("uploads/{id}.mp4"),
            MediaType::Audio => format!("uploads/{id}.mp3"),
        };
        self.store
            .inner
            .put(RAW, &key, b"source bytes".to_vec(), "application/octet-stream")
            .await
            .unwrap();

        let item = MediaItem::new(id, "Test media", "owner-1", media_type).with_source(RAW, &key);
        self.metadata.create(&item).await.unwrap();
        item
    }

    /// Entries left in the scratch root.
    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(self.work_dir.path().join("scratch")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    pub fn published(&self) -> Vec<String> {
        self.store.inner.keys(PROCESSED)
    }
}
