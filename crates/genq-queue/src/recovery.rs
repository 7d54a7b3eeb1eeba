//! Recovery of jobs abandoned by crashed workers.
//!
//! A processing job is abandoned when neither its worker's heartbeat nor the
//! job record itself moved for `stale_after`. Such jobs go back to the queue
//! with their original priority, or fail once they used up `max_attempts`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use genq_models::{Job, JobId, JobStatus};

use crate::backend::{QueueBackend, QueueEntry};
use crate::error::QueueResult;
use crate::store::{chrono_duration, JobStore};

/// Outcome of one recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs put back into the queue
    pub requeued: Vec<JobId>,
    /// Jobs failed because they ran out of attempts
    pub failed: Vec<JobId>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

fn last_activity(job: &Job, heartbeats: &HashMap<String, DateTime<Utc>>) -> DateTime<Utc> {
    job.worker_id
        .as_ref()
        .and_then(|worker| heartbeats.get(worker))
        .map_or(job.updated_at, |hb| (*hb).max(job.updated_at))
}

impl<B: QueueBackend> JobStore<B> {
    /// Requeue or fail processing jobs whose worker stopped reporting.
    ///
    /// A job that changes while the sweep looks at it is left alone; the
    /// change proves its worker is alive.
    pub async fn requeue_abandoned(
        &self,
        stale_after: Duration,
        max_attempts: u32,
    ) -> QueueResult<RecoveryReport> {
        let backend = self.backend();
        let now = Utc::now();
        let cutoff = now - chrono_duration(stale_after);

        let heartbeats: HashMap<String, DateTime<Utc>> = backend
            .heartbeats()
            .await?
            .into_iter()
            .map(|hb| (hb.worker_id, hb.last_seen))
            .collect();

        let mut report = RecoveryReport::default();

        for job in backend.load_all_jobs().await? {
            if job.status != JobStatus::Processing || last_activity(&job, &heartbeats) > cutoff {
                continue;
            }
            self.recover(job, now, max_attempts, &mut report).await?;
        }

        if !report.is_empty() {
            info!(
                "Recovery sweep complete: {} requeued, {} failed",
                report.requeued.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }

    /// Requeue or fail processing jobs still owned by `worker_id`.
    ///
    /// For a worker starting up: it runs one job at a time and holds none
    /// yet, so anything recorded under its id was left by a previous
    /// process with the same identity. Its fresh heartbeats would otherwise
    /// hide those jobs from [`requeue_abandoned`](Self::requeue_abandoned).
    pub async fn release_orphaned(
        &self,
        worker_id: &str,
        max_attempts: u32,
    ) -> QueueResult<RecoveryReport> {
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for job in self.backend().load_all_jobs().await? {
            if job.status == JobStatus::Processing && job.is_owned_by(worker_id) {
                self.recover(job, now, max_attempts, &mut report).await?;
            }
        }

        if !report.is_empty() {
            info!(
                worker_id,
                "Released orphaned jobs: {} requeued, {} failed",
                report.requeued.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }

    /// Put one abandoned job back in the queue, or fail it once it used up
    /// its attempts. Skipped if the job changed since it was loaded.
    async fn recover(
        &self,
        mut job: Job,
        now: DateTime<Utc>,
        max_attempts: u32,
        report: &mut RecoveryReport,
    ) -> QueueResult<()> {
        let backend = self.backend();
        let expected_version = job.version;
        let worker = job.worker_id.clone().unwrap_or_default();

        if job.attempts >= max_attempts {
            job.fail(
                format!(
                    "Worker {} stopped responding; giving up after {} attempts",
                    worker, job.attempts
                ),
                now,
            );
            if backend.swap_job(&job, expected_version).await? {
                warn!(job_id = %job.id, worker_id = %worker, attempts = job.attempts, "Failed abandoned job");
                report.failed.push(job.id);
            }
            return Ok(());
        }

        let seq = backend.next_seq().await?;
        job.requeue(seq, now);
        if backend
            .swap_and_enqueue(&job, expected_version, &QueueEntry::for_job(&job))
            .await?
        {
            warn!(
                job_id = %job.id,
                worker_id = %worker,
                priority = job.priority,
                "Requeued abandoned job"
            );
            report.requeued.push(job.id);
        }
        Ok(())
    }
}
