//! Shared data models for the generation job queue.
//!
//! This crate provides Serde-serializable types for:
//! - Generation jobs and their lifecycle status
//! - Queue statistics and worker heartbeats
//! - Normalized generation output (artifacts + metadata)

pub mod job;
pub mod job_status;
pub mod output;
pub mod worker;

// Re-export common types
pub use job::{clamp_progress, Job, JobId, JobType, Parameters};
pub use job_status::{JobStatus, ParseEnumError, QueueStats};
pub use output::{Artifact, GenerationOutput, GenerationResult, MediaKind};
pub use worker::{WorkerHeartbeat, ACTIVE_WORKER_WINDOW_SECS};
