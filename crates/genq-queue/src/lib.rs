//! Priority job store for generation jobs.
//!
//! This crate provides:
//! - Durable job records keyed by job ID
//! - An atomic priority dequeue (highest priority first, FIFO among equals)
//! - A worker heartbeat registry
//! - Ownership-checked, version-guarded job mutations
//! - On-demand cleanup and stale-worker recovery
//!
//! Storage is pluggable through [`QueueBackend`]: [`RedisBackend`] is shared
//! between processes, [`MemoryBackend`] serves tests and single-process use.

pub mod backend;
pub mod error;
pub mod recovery;
pub mod store;

pub use backend::{MemoryBackend, QueueBackend, QueueConfig, QueueEntry, RedisBackend};
pub use error::{QueueError, QueueResult};
pub use recovery::RecoveryReport;
pub use store::JobStore;
