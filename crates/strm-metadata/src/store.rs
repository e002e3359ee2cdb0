//! Metadata store interface.

use async_trait::async_trait;
use strm_models::{MediaId, MediaItem, MediaStatus, Rendition};

use crate::error::{MetadataError, MetadataResult};

/// Durable store of media items.
///
/// Status and rendition writes touch only their own fields; they never
/// rewrite the whole record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new item. Fails with `AlreadyExists` when the id is taken.
    async fn create(&self, item: &MediaItem) -> MetadataResult<()>;

    async fn get(&self, id: &MediaId) -> MetadataResult<Option<MediaItem>>;

    /// Move an item to `status`.
    ///
    /// Rejects transitions outside the status state machine and refuses to
    /// complete an item with no renditions. Sets `processed_at` on the
    /// transition into `completed`.
    async fn update_status(&self, id: &MediaId, status: MediaStatus) -> MetadataResult<()>;

    /// Append one rendition record.
    async fn append_rendition(&self, id: &MediaId, rendition: &Rendition) -> MetadataResult<()>;

    /// Drop every rendition record, before a retried run produces new ones.
    async fn clear_renditions(&self, id: &MediaId) -> MetadataResult<()>;

    /// Record the probed source duration.
    async fn set_duration(&self, id: &MediaId, duration: f64) -> MetadataResult<()>;

    /// Delete an item. Deleting a missing item succeeds.
    async fn delete(&self, id: &MediaId) -> MetadataResult<()>;

    /// Items owned by `owner`, newest first.
    async fn list_by_owner(&self, owner: &str) -> MetadataResult<Vec<MediaItem>>;

    /// Fetch an item that must exist.
    async fn require(&self, id: &MediaId) -> MetadataResult<MediaItem> {
        self.get(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(id.clone()))
    }
}

/// Validate a status change against the state machine.
pub(crate) fn check_transition(
    id: &MediaId,
    from: MediaStatus,
    to: MediaStatus,
    rendition_count: usize,
) -> MetadataResult<()> {
    if !from.can_transition_to(to) {
        return Err(MetadataError::InvalidTransition {
            id: id.clone(),
            from,
            to,
        });
    }
    if to == MediaStatus::Completed && rendition_count == 0 {
        return Err(MetadataError::NoRenditions(id.clone()));
    }
    Ok(())
}
