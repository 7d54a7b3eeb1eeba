//! Storage primitives underneath the job store.
//!
//! A backend owns three structures: the job record map, the priority
//! dequeue, and the worker heartbeat registry. Every method must be atomic
//! on its own; the job store composes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use genq_models::{Job, JobId, WorkerHeartbeat};

use crate::error::{QueueError, QueueResult};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::{QueueConfig, RedisBackend};

/// One entry of the priority dequeue.
///
/// Entries order by `priority` (highest first), then by `seq` (lowest
/// first), so jobs of equal priority leave the queue in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: i32,
    pub seq: u64,
}

impl QueueEntry {
    /// Entry for a job, using the priority and sequence stored on it.
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            priority: job.priority,
            seq: job.queue_seq,
        }
    }

    /// Sorted-set member encoding.
    ///
    /// The sequence is stored inverted and zero-padded so that, among equal
    /// scores, the lexicographically greatest member is the oldest entry.
    pub fn member(&self) -> String {
        format!("{:016x}:{}", u64::MAX - self.seq, self.job_id)
    }

    /// Decode a sorted-set member and its score.
    pub fn from_member(member: &str, score: f64) -> QueueResult<Self> {
        let (inverted, job_id) = member
            .split_once(':')
            .ok_or_else(|| QueueError::invalid_entry(member))?;
        let inverted = u64::from_str_radix(inverted, 16)
            .map_err(|_| QueueError::invalid_entry(member))?;

        Ok(Self {
            job_id: JobId::from_string(job_id),
            priority: score as i32,
            seq: u64::MAX - inverted,
        })
    }
}

/// Storage primitives shared by all job store instances.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Check that the storage is reachable.
    async fn ping(&self) -> QueueResult<()>;

    /// Next value of the shared enqueue sequence.
    async fn next_seq(&self) -> QueueResult<u64>;

    /// Persist a new queued job and its dequeue entry together.
    async fn insert_queued(&self, job: &Job) -> QueueResult<()>;

    async fn load_job(&self, job_id: &JobId) -> QueueResult<Option<Job>>;

    async fn load_all_jobs(&self) -> QueueResult<Vec<Job>>;

    /// Replace a job record if its stored version equals `expected_version`.
    ///
    /// Returns `false` when the record is missing or was changed meanwhile.
    async fn swap_job(&self, job: &Job, expected_version: u64) -> QueueResult<bool>;

    /// Like [`swap_job`](Self::swap_job), and on success also push `entry`
    /// into the dequeue in the same atomic step.
    async fn swap_and_enqueue(
        &self,
        job: &Job,
        expected_version: u64,
        entry: &QueueEntry,
    ) -> QueueResult<bool>;

    /// Delete a job record if its stored version equals `expected_version`.
    async fn delete_job(&self, job_id: &JobId, expected_version: u64) -> QueueResult<bool>;

    /// Atomically remove and return the highest-ranked entry.
    async fn pop_max(&self) -> QueueResult<Option<QueueEntry>>;

    /// Remove an entry; `false` if it was not queued.
    async fn remove_entry(&self, entry: &QueueEntry) -> QueueResult<bool>;

    async fn queue_len(&self) -> QueueResult<u64>;

    async fn record_heartbeat(&self, worker_id: &str, at: DateTime<Utc>) -> QueueResult<()>;

    async fn heartbeats(&self) -> QueueResult<Vec<WorkerHeartbeat>>;

    async fn remove_heartbeat(&self, worker_id: &str) -> QueueResult<()>;
}
