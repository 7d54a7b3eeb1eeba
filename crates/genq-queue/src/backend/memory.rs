//! In-process backend.
//!
//! All state sits behind one async mutex, so every primitive is trivially
//! atomic. Useful for tests and single-process deployments.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use genq_models::{Job, JobId, WorkerHeartbeat};

use super::{QueueBackend, QueueEntry};
use crate::error::QueueResult;

type QueueKey = (i32, Reverse<u64>);

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    queue: BTreeMap<QueueKey, JobId>,
    heartbeats: HashMap<String, DateTime<Utc>>,
    seq: u64,
}

impl MemoryState {
    fn swap(&mut self, job: &Job, expected_version: u64) -> bool {
        match self.jobs.get_mut(&job.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = job.clone();
                true
            }
            _ => false,
        }
    }

    fn push(&mut self, entry: &QueueEntry) {
        self.queue
            .insert(queue_key(entry), entry.job_id.clone());
    }
}

fn queue_key(entry: &QueueEntry) -> QueueKey {
    (entry.priority, Reverse(entry.seq))
}

/// Backend keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn next_seq(&self) -> QueueResult<u64> {
        let mut state = self.state.lock().await;
        state.seq += 1;
        Ok(state.seq)
    }

    async fn insert_queued(&self, job: &Job) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id.clone(), job.clone());
        state.push(&QueueEntry::for_job(job));
        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn load_all_jobs(&self) -> QueueResult<Vec<Job>> {
        Ok(self.state.lock().await.jobs.values().cloned().collect())
    }

    async fn swap_job(&self, job: &Job, expected_version: u64) -> QueueResult<bool> {
        Ok(self.state.lock().await.swap(job, expected_version))
    }

    async fn swap_and_enqueue(
        &self,
        job: &Job,
        expected_version: u64,
        entry: &QueueEntry,
    ) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if !state.swap(job, expected_version) {
            return Ok(false);
        }
        state.push(entry);
        Ok(true)
    }

    async fn delete_job(&self, job_id: &JobId, expected_version: u64) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get(job_id) {
            Some(stored) if stored.version == expected_version => {
                state.jobs.remove(job_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pop_max(&self) -> QueueResult<Option<QueueEntry>> {
        let mut state = self.state.lock().await;
        Ok(state
            .queue
            .pop_last()
            .map(|((priority, Reverse(seq)), job_id)| QueueEntry {
                job_id,
                priority,
                seq,
            }))
    }

    async fn remove_entry(&self, entry: &QueueEntry) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let key = queue_key(entry);
        if state.queue.get(&key) == Some(&entry.job_id) {
            state.queue.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn queue_len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.queue.len() as u64)
    }

    async fn record_heartbeat(&self, worker_id: &str, at: DateTime<Utc>) -> QueueResult<()> {
        self.state
            .lock()
            .await
            .heartbeats
            .insert(worker_id.to_string(), at);
        Ok(())
    }

    async fn heartbeats(&self) -> QueueResult<Vec<WorkerHeartbeat>> {
        Ok(self
            .state
            .lock()
            .await
            .heartbeats
            .iter()
            .map(|(worker_id, at)| WorkerHeartbeat::new(worker_id.clone(), *at))
            .collect())
    }

    async fn remove_heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        self.state.lock().await.heartbeats.remove(worker_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genq_models::JobType;

    fn entry(id: &str, priority: i32, seq: u64) -> QueueEntry {
        QueueEntry {
            job_id: JobId::from_string(id),
            priority,
            seq,
        }
    }

    #[tokio::test]
    async fn test_pop_max_orders_by_priority_then_seq() {
        let backend = MemoryBackend::new();
        let mut state = backend.state.lock().await;
        state.push(&entry("low", 1, 1));
        state.push(&entry("high-late", 10, 3));
        state.push(&entry("high-early", 10, 2));
        drop(state);

        let order: Vec<String> = [
            backend.pop_max().await.unwrap(),
            backend.pop_max().await.unwrap(),
            backend.pop_max().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.unwrap().job_id.0)
        .collect();

        assert_eq!(order, vec!["high-early", "high-late", "low"]);
        assert!(backend.pop_max().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_swap_requires_matching_version() {
        let backend = MemoryBackend::new();
        let mut job = Job::new(JobType::TextToImage, Default::default(), 0, 1);
        backend.insert_queued(&job).await.unwrap();

        job.cancel(Utc::now());
        assert!(!backend.swap_job(&job, 5).await.unwrap());
        assert!(backend.swap_job(&job, 0).await.unwrap());
        // The stored version moved on, the same expectation now fails
        assert!(!backend.swap_job(&job, 0).await.unwrap());
    }
}
