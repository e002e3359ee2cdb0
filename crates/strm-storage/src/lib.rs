//! Object storage for sources and published outputs.
//!
//! This crate provides:
//! - The [`ObjectStore`] interface
//! - An S3-compatible client (AWS S3, MinIO, R2)
//! - An in-memory store for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryObjectStore, StoredObject};
pub use store::{ObjectInfo, ObjectStore};
