//! Media item metadata store.
//!
//! This crate provides:
//! - The [`MetadataStore`] interface with targeted partial writes
//! - A Redis implementation (hash per item, rendition list, owner index)
//! - An in-memory implementation

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryMetadataStore;
pub use redis_store::{RedisMetadataConfig, RedisMetadataStore};
pub use store::MetadataStore;
