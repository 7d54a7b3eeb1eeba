//! Job store: create, claim, update and inspect generation jobs.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use genq_models::{Job, JobId, JobStatus, JobType, Parameters, QueueStats};

use crate::backend::{MemoryBackend, QueueBackend, QueueConfig, QueueEntry, RedisBackend};
use crate::error::{QueueError, QueueResult};

/// Attempts at a compare-and-swap before reporting a conflict.
const MAX_SWAP_ATTEMPTS: u32 = 8;

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Shared job store.
///
/// Producers, workers and operators each hold one of these over the same
/// backend; all coordination goes through the backend's atomic primitives.
pub struct JobStore<B: QueueBackend = RedisBackend> {
    backend: B,
}

impl JobStore<RedisBackend> {
    /// Connect to Redis. Errors here mean the store is unusable.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        Ok(Self::new(RedisBackend::connect(config).await?))
    }

    /// Connect using environment configuration.
    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(&QueueConfig::from_env()).await
    }
}

impl JobStore<MemoryBackend> {
    /// Store over a fresh in-process backend.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: QueueBackend> JobStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load, modify and conditionally write back a job.
    ///
    /// `apply` returns `false` to leave the job untouched. Returns the written
    /// job, or `None` if the job is missing or `apply` declined. On a version
    /// conflict the job is reloaded and `apply` runs again on fresh state.
    pub(crate) async fn mutate<F>(&self, job_id: &JobId, mut apply: F) -> QueueResult<Option<Job>>
    where
        F: FnMut(&mut Job) -> bool + Send,
    {
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let Some(mut job) = self.backend.load_job(job_id).await? else {
                return Ok(None);
            };

            let expected_version = job.version;
            if !apply(&mut job) {
                return Ok(None);
            }

            if self.backend.swap_job(&job, expected_version).await? {
                return Ok(Some(job));
            }

            debug!("Job {} changed concurrently (attempt {})", job_id, attempt);
        }

        Err(QueueError::Conflict(job_id.to_string()))
    }

    /// Create a queued job and return its ID.
    pub async fn create(
        &self,
        job_type: JobType,
        parameters: Parameters,
        priority: i32,
    ) -> QueueResult<JobId> {
        let seq = self.backend.next_seq().await?;
        let job = Job::new(job_type, parameters, priority, seq);

        self.backend.insert_queued(&job).await?;

        info!(
            job_id = %job.id,
            job_type = %job_type,
            priority,
            "Created job"
        );
        Ok(job.id)
    }

    /// Claim the highest-priority queued job for `worker_id`.
    ///
    /// Among equal priorities the earliest enqueued job wins. Queue entries
    /// whose record vanished or was cancelled before the pop are discarded.
    pub async fn claim(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        loop {
            let Some(entry) = self.backend.pop_max().await? else {
                return Ok(None);
            };

            let now = Utc::now();
            let claimed = self
                .mutate(&entry.job_id, |job| {
                    if job.status != JobStatus::Queued {
                        return false;
                    }
                    job.start(worker_id, now);
                    true
                })
                .await?;

            match claimed {
                Some(job) => {
                    self.backend.record_heartbeat(worker_id, now).await?;
                    info!(
                        job_id = %job.id,
                        worker_id,
                        attempt = job.attempts,
                        "Claimed job"
                    );
                    return Ok(Some(job));
                }
                None => {
                    warn!(
                        job_id = %entry.job_id,
                        "Discarding queue entry for a job that is missing or no longer queued"
                    );
                }
            }
        }
    }

    /// Record progress for a job owned by `worker_id`.
    ///
    /// Returns `false` if the job is missing, owned by another worker, or no
    /// longer processing. Progress is clamped to `0..=100`.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        progress: i64,
        worker_id: &str,
    ) -> QueueResult<bool> {
        let now = Utc::now();
        let updated = self
            .mutate(job_id, |job| {
                if !job.accepts_update_from(worker_id) {
                    return false;
                }
                job.set_progress(progress, now);
                true
            })
            .await?;

        if updated.is_none() {
            debug!(%job_id, worker_id, "Progress update rejected");
            return Ok(false);
        }

        self.backend.record_heartbeat(worker_id, now).await?;
        Ok(true)
    }

    /// Mark a job owned by `worker_id` as completed with `result`.
    pub async fn complete(&self, job_id: &JobId, result: Value, worker_id: &str) -> QueueResult<bool> {
        let now = Utc::now();
        let completed = self
            .mutate(job_id, |job| {
                if !job.accepts_update_from(worker_id) {
                    return false;
                }
                job.complete(result.clone(), now);
                true
            })
            .await?;

        Ok(self.log_outcome(job_id, worker_id, "complete", completed.is_some()))
    }

    /// Mark a job owned by `worker_id` as failed with `error`.
    pub async fn fail(&self, job_id: &JobId, error: &str, worker_id: &str) -> QueueResult<bool> {
        let now = Utc::now();
        let failed = self
            .mutate(job_id, |job| {
                if !job.accepts_update_from(worker_id) {
                    return false;
                }
                job.fail(error, now);
                true
            })
            .await?;

        Ok(self.log_outcome(job_id, worker_id, "fail", failed.is_some()))
    }

    fn log_outcome(&self, job_id: &JobId, worker_id: &str, action: &str, applied: bool) -> bool {
        if applied {
            info!(%job_id, worker_id, "Job {} recorded", action);
        } else {
            warn!(
                %job_id,
                worker_id,
                "Rejected {}: job missing, not owned by worker, or no longer processing",
                action
            );
        }
        applied
    }

    /// Cancel a queued or processing job.
    ///
    /// Terminal jobs are left untouched and `false` is returned. A worker
    /// already processing the job is not interrupted; its later
    /// `complete`/`fail` calls are rejected.
    pub async fn cancel(&self, job_id: &JobId) -> QueueResult<bool> {
        let Some(job) = self.backend.load_job(job_id).await? else {
            return Ok(false);
        };

        self.backend.remove_entry(&QueueEntry::for_job(&job)).await?;

        let now = Utc::now();
        let cancelled = self
            .mutate(job_id, |job| {
                if job.is_terminal() {
                    return false;
                }
                job.cancel(now);
                true
            })
            .await?;

        match cancelled {
            Some(job) => {
                // A requeue between the load and the swap leaves a newer entry
                self.backend.remove_entry(&QueueEntry::for_job(&job)).await?;
                info!(%job_id, worker_id = ?job.worker_id, "Cancelled job");
                Ok(true)
            }
            None => {
                debug!(%job_id, "Cancel ignored, job missing or already terminal");
                Ok(false)
            }
        }
    }

    pub async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        self.backend.load_job(job_id).await
    }

    /// List jobs, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> QueueResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .backend
            .load_all_jobs()
            .await?
            .into_iter()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();

        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.queue_seq.cmp(&a.queue_seq))
        });
        jobs.truncate(limit);

        Ok(jobs)
    }

    /// Aggregate counts over all jobs, the queue and worker heartbeats.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();
        for job in self.backend.load_all_jobs().await? {
            stats.record(job.status);
        }

        stats.queue_length = self.backend.queue_len().await?;
        stats.active_workers = self.active_worker_count().await?;

        Ok(stats)
    }

    /// Number of workers whose heartbeat is inside the active window.
    pub async fn active_worker_count(&self) -> QueueResult<u64> {
        let now = Utc::now();
        Ok(self
            .backend
            .heartbeats()
            .await?
            .iter()
            .filter(|hb| hb.is_active(now))
            .count() as u64)
    }

    /// Refresh the heartbeat of `worker_id`.
    pub async fn heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        self.backend.record_heartbeat(worker_id, Utc::now()).await
    }

    /// Remove terminal jobs that finished at least `max_age_hours` ago.
    ///
    /// A job modified while the sweep runs is skipped rather than removed.
    pub async fn cleanup(&self, max_age_hours: u32) -> QueueResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(i64::from(max_age_hours));

        let mut removed = 0u64;
        for job in self.backend.load_all_jobs().await? {
            if !job.is_expired(cutoff) {
                continue;
            }
            if self.backend.delete_job(&job.id, job.version).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Cleaned up {} jobs older than {}h", removed, max_age_hours);
        }
        Ok(removed)
    }

    /// Drop heartbeat entries older than `max_age`.
    pub async fn prune_heartbeats(&self, max_age: Duration) -> QueueResult<u64> {
        let now = Utc::now();
        let max_age = chrono_duration(max_age);

        let mut pruned = 0u64;
        for hb in self.backend.heartbeats().await? {
            if !hb.is_fresh(now, max_age) {
                self.backend.remove_heartbeat(&hb.worker_id).await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!("Pruned {} stale worker heartbeats", pruned);
        }
        Ok(pruned)
    }
}
