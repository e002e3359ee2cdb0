//! Priority-ordered, at-least-once job queue.
//!
//! This crate provides:
//! - The [`JobQueue`] operation interface
//! - A Redis implementation (sorted set + in-flight / dead-letter hashes)
//! - An in-process implementation with the same semantics
//! - Queue metrics

pub mod error;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobQueue;
pub use queue::{JobQueue, NackOutcome, QueueConfig};
pub use redis_queue::RedisJobQueue;
