//! In-memory metadata store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use strm_models::{MediaId, MediaItem, MediaStatus, Rendition};

use crate::error::{MetadataError, MetadataResult};
use crate::store::{check_transition, MetadataStore};

#[derive(Default)]
pub struct MemoryMetadataStore {
    items: Mutex<HashMap<MediaId, MediaItem>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MetadataResult<MutexGuard<'_, HashMap<MediaId, MediaItem>>> {
        self.items
            .lock()
            .map_err(|_| MetadataError::connection_failed("metadata lock poisoned"))
    }

    fn with_item<T>(
        &self,
        id: &MediaId,
        f: impl FnOnce(&mut MediaItem) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        let mut items = self.items()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| MetadataError::NotFound(id.clone()))?;
        f(item)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, item: &MediaItem) -> MetadataResult<()> {
        let mut items = self.items()?;
        if items.contains_key(&item.id) {
            return Err(MetadataError::AlreadyExists(item.id.clone()));
        }
        items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get(&self, id: &MediaId) -> MetadataResult<Option<MediaItem>> {
        Ok(self.items()?.get(id).cloned())
    }

    async fn update_status(&self, id: &MediaId, status: MediaStatus) -> MetadataResult<()> {
        self.with_item(id, |item| {
            check_transition(id, item.status, status, item.renditions.len())?;
            let now = Utc::now();
            item.status = status;
            item.updated_at = now;
            if status == MediaStatus::Completed {
                item.processed_at = Some(now);
            }
            Ok(())
        })
    }

    async fn append_rendition(&self, id: &MediaId, rendition: &Rendition) -> MetadataResult<()> {
        self.with_item(id, |item| {
            item.renditions.push(rendition.clone());
            item.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn clear_renditions(&self, id: &MediaId) -> MetadataResult<()> {
        self.with_item(id, |item| {
            item.renditions.clear();
            item.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn set_duration(&self, id: &MediaId, duration: f64) -> MetadataResult<()> {
        self.with_item(id, |item| {
            item.duration = Some(duration);
            Ok(())
        })
    }

    async fn delete(&self, id: &MediaId) -> MetadataResult<()> {
        self.items()?.remove(id);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> MetadataResult<Vec<MediaItem>> {
        let mut owned: Vec<MediaItem> = self
            .items()?
            .values()
            .filter(|item| item.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}
