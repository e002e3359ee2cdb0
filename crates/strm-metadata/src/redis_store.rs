//! Redis-backed metadata store.
//!
//! Layout (under `key_prefix`):
//! - `media:{id}`            HASH: `record` (creation-time JSON), `status`,
//!   `updated_at`, `processed_at`, `duration`
//! - `media:{id}:renditions` LIST of rendition JSON, in append order
//! - `owner:{owner}:media`   SET of media ids

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use strm_models::{MediaId, MediaItem, MediaStatus, Rendition};
use tracing::{debug, info};

use crate::error::{MetadataError, MetadataResult};
use crate::store::{check_transition, MetadataStore};

const FIELD_RECORD: &str = "record";
const FIELD_STATUS: &str = "status";
const FIELD_UPDATED_AT: &str = "updated_at";
const FIELD_PROCESSED_AT: &str = "processed_at";
const FIELD_DURATION: &str = "duration";

/// Redis metadata store configuration.
#[derive(Debug, Clone)]
pub struct RedisMetadataConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for RedisMetadataConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "strm".to_string(),
        }
    }
}

impl RedisMetadataConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "strm".to_string()),
        }
    }
}

pub struct RedisMetadataStore {
    client: redis::Client,
    config: RedisMetadataConfig,
}

impl RedisMetadataStore {
    pub fn new(config: RedisMetadataConfig) -> MetadataResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MetadataResult<Self> {
        Self::new(RedisMetadataConfig::from_env())
    }

    async fn connection(&self) -> MetadataResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| MetadataError::connection_failed(e.to_string()))
    }

    fn item_key(&self, id: &MediaId) -> String {
        format!("{}:media:{}", self.config.key_prefix, id)
    }

    fn renditions_key(&self, id: &MediaId) -> String {
        format!("{}:media:{}:renditions", self.config.key_prefix, id)
    }

    fn owner_key(&self, owner: &str) -> String {
        format!("{}:owner:{}:media", self.config.key_prefix, owner)
    }

    /// Current status and rendition count, failing when the item is missing.
    async fn status_of(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &MediaId,
    ) -> MetadataResult<(MediaStatus, usize)> {
        let status: Option<String> = conn.hget(self.item_key(id), FIELD_STATUS).await?;
        let status = status.ok_or_else(|| MetadataError::NotFound(id.clone()))?;
        let status: MediaStatus = status
            .parse()
            .map_err(|e: strm_models::ModelError| MetadataError::corrupt(id, e.to_string()))?;
        let renditions: usize = conn.llen(self.renditions_key(id)).await?;
        Ok((status, renditions))
    }

    async fn ensure_exists(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &MediaId,
    ) -> MetadataResult<()> {
        let exists: bool = conn.exists(self.item_key(id)).await?;
        if exists {
            Ok(())
        } else {
            Err(MetadataError::NotFound(id.clone()))
        }
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &MediaId,
    ) -> MetadataResult<Option<MediaItem>> {
        let fields: HashMap<String, String> = conn.hgetall(self.item_key(id)).await?;
        let Some(record) = fields.get(FIELD_RECORD) else {
            return Ok(None);
        };

        let mut item: MediaItem = serde_json::from_str(record)?;

        if let Some(status) = fields.get(FIELD_STATUS) {
            item.status = status
                .parse()
                .map_err(|e: strm_models::ModelError| MetadataError::corrupt(id, e.to_string()))?;
        }
        if let Some(ts) = fields.get(FIELD_UPDATED_AT) {
            item.updated_at = parse_time(id, ts)?;
        }
        if let Some(ts) = fields.get(FIELD_PROCESSED_AT) {
            item.processed_at = Some(parse_time(id, ts)?);
        }
        if let Some(duration) = fields.get(FIELD_DURATION) {
            item.duration = duration.parse().ok();
        }

        let renditions: Vec<String> = conn.lrange(self.renditions_key(id), 0, -1).await?;
        item.renditions = renditions
            .iter()
            .map(|r| serde_json::from_str(r))
            .collect::<Result<_, _>>()?;

        Ok(Some(item))
    }
}

fn parse_time(id: &MediaId, value: &str) -> MetadataResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MetadataError::corrupt(id, format!("bad timestamp {value}: {e}")))
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn create(&self, item: &MediaItem) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        let key = self.item_key(&item.id);

        let mut record = item.clone();
        record.renditions.clear();
        let record = serde_json::to_string(&record)?;

        let created: bool = conn.hset_nx(&key, FIELD_RECORD, &record).await?;
        if !created {
            return Err(MetadataError::AlreadyExists(item.id.clone()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, FIELD_STATUS, item.status.as_str())
            .ignore()
            .hset(&key, FIELD_UPDATED_AT, item.updated_at.to_rfc3339())
            .ignore()
            .sadd(self.owner_key(&item.owner_id), item.id.as_str())
            .ignore();
        for rendition in &item.renditions {
            pipe.rpush(self.renditions_key(&item.id), serde_json::to_string(rendition)?)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        info!(media_id = %item.id, "Created media record");
        Ok(())
    }

    async fn get(&self, id: &MediaId) -> MetadataResult<Option<MediaItem>> {
        let mut conn = self.connection().await?;
        self.load(&mut conn, id).await
    }

    async fn update_status(&self, id: &MediaId, status: MediaStatus) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        let (current, renditions) = self.status_of(&mut conn, id).await?;
        check_transition(id, current, status, renditions)?;

        let now = Utc::now().to_rfc3339();
        let mut fields = vec![
            (FIELD_STATUS, status.as_str().to_string()),
            (FIELD_UPDATED_AT, now.clone()),
        ];
        if status == MediaStatus::Completed {
            fields.push((FIELD_PROCESSED_AT, now));
        }

        conn.hset_multiple::<_, _, _, ()>(self.item_key(id), fields.as_slice())
            .await?;

        debug!(media_id = %id, from = %current, to = %status, "Updated media status");
        Ok(())
    }

    async fn append_rendition(&self, id: &MediaId, rendition: &Rendition) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_exists(&mut conn, id).await?;

        redis::pipe()
            .atomic()
            .rpush(self.renditions_key(id), serde_json::to_string(rendition)?)
            .ignore()
            .hset(self.item_key(id), FIELD_UPDATED_AT, Utc::now().to_rfc3339())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(media_id = %id, rendition = %rendition.name, "Appended rendition");
        Ok(())
    }

    async fn clear_renditions(&self, id: &MediaId) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_exists(&mut conn, id).await?;
        conn.del::<_, ()>(self.renditions_key(id)).await?;
        Ok(())
    }

    async fn set_duration(&self, id: &MediaId, duration: f64) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_exists(&mut conn, id).await?;
        conn.hset::<_, _, _, ()>(self.item_key(id), FIELD_DURATION, duration)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &MediaId) -> MetadataResult<()> {
        let mut conn = self.connection().await?;
        let Some(item) = self.load(&mut conn, id).await? else {
            return Ok(());
        };

        redis::pipe()
            .atomic()
            .del(self.item_key(id))
            .ignore()
            .del(self.renditions_key(id))
            .ignore()
            .srem(self.owner_key(&item.owner_id), id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        info!(media_id = %id, "Deleted media record");
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> MetadataResult<Vec<MediaItem>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.owner_key(owner)).await?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.load(&mut conn, &MediaId::from(id)).await? {
                items.push(item);
            }
        }
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }
}
