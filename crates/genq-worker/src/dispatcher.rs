//! Dispatch loop.
//!
//! One dispatcher processes one job at a time: claim, execute against the
//! remote provider while reporting progress, record the outcome, repeat.
//! Run several worker processes for parallelism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use genq_models::{GenerationResult, Job, JobId, JobType};
use genq_provider::{HandlerRegistry, ProgressReporter, RemoteGeneration, Workflow};
use genq_queue::{JobStore, QueueBackend, RedisBackend};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_store, FailureTracker, RetryConfig};

/// Progress reported as soon as a job is picked up.
pub const STARTED_PROGRESS: i64 = 10;

/// Progress reported once the remote job finished, before the result is stored.
pub const FINALIZING_PROGRESS: i64 = 95;

/// Writes progress estimates to the job store on behalf of the owning worker.
struct StoreProgress<'a, B: QueueBackend> {
    store: &'a JobStore<B>,
    job_id: &'a JobId,
    worker_id: &'a str,
    logger: &'a JobLogger,
}

impl<B: QueueBackend> StoreProgress<'_, B> {
    async fn set(&self, progress: i64) {
        match self
            .store
            .update_progress(self.job_id, progress, self.worker_id)
            .await
        {
            Ok(true) => debug!(job_id = %self.job_id, progress, "Progress updated"),
            Ok(false) => self
                .logger
                .log_warning("progress update rejected, job cancelled or reclaimed"),
            Err(e) => self
                .logger
                .log_warning(&format!("failed to record progress: {}", e)),
        }
    }
}

#[async_trait]
impl<B: QueueBackend> ProgressReporter for StoreProgress<'_, B> {
    async fn report(&self, progress: u8) {
        self.logger.log_progress(progress);
        self.set(i64::from(progress)).await;
    }
}

/// Dispatch loop over a shared job store.
pub struct Dispatcher<B: QueueBackend = RedisBackend> {
    config: WorkerConfig,
    store: Arc<JobStore<B>>,
    workflows: HashMap<JobType, Workflow>,
    shutdown: watch::Sender<bool>,
}

impl<B: QueueBackend + 'static> Dispatcher<B> {
    /// Create a dispatcher with one workflow per registered handler.
    ///
    /// `endpoint_for` names the provider endpoint serving each job type.
    pub fn new<F>(
        config: WorkerConfig,
        store: Arc<JobStore<B>>,
        registry: &HandlerRegistry,
        remote: Arc<dyn RemoteGeneration>,
        endpoint_for: F,
    ) -> Self
    where
        F: Fn(JobType) -> String,
    {
        let workflows = registry
            .job_types()
            .into_iter()
            .filter_map(|job_type| {
                registry.get(job_type).map(|handler| {
                    let workflow = Workflow::new(handler, Arc::clone(&remote), endpoint_for(job_type));
                    (job_type, workflow)
                })
            })
            .collect();

        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            workflows,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Ask the loop to stop after the current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    ///
    /// Job failures never end the loop; store errors are logged and backed off.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            mode = %self.config.submission_mode,
            "Starting dispatcher"
        );

        match self
            .store
            .release_orphaned(&self.config.worker_id, self.config.max_attempts)
            .await
        {
            Ok(report) => metrics::record_recovery(report.requeued.len(), report.failed.len()),
            Err(e) => warn!("Failed to release jobs left by a previous run: {}", e),
        }

        let recovery_task = self.spawn_recovery();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_failures = FailureTracker::new(3);
        let mut last_heartbeat: Option<Instant> = None;

        while !*shutdown_rx.borrow() {
            match self.store.claim(&self.config.worker_id).await {
                Ok(Some(job)) => {
                    claim_failures.record_success();
                    self.process(job).await;
                    last_heartbeat = Some(Instant::now());
                }
                Ok(None) => {
                    claim_failures.record_success();

                    let heartbeat_due = last_heartbeat
                        .map_or(true, |at| at.elapsed() >= self.config.idle_heartbeat_interval);
                    if heartbeat_due {
                        match self.store.heartbeat(&self.config.worker_id).await {
                            Ok(()) => last_heartbeat = Some(Instant::now()),
                            Err(e) => warn!("Failed to record idle heartbeat: {}", e),
                        }
                    }

                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.idle_sleep) => {}
                    }
                }
                Err(e) => {
                    if claim_failures.record_failure() {
                        error!("Error claiming jobs: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        if let Some(task) = recovery_task {
            task.abort();
        }

        info!(worker_id = %self.config.worker_id, "Dispatcher stopped");
        Ok(())
    }

    /// Periodically hand abandoned jobs back to the queue.
    fn spawn_recovery(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.recovery_interval?;
        let store = Arc::clone(&self.store);
        let stale_after = self.config.stale_after;
        let max_attempts = self.config.max_attempts;
        let mut shutdown_rx = self.shutdown.subscribe();

        info!("Starting abandoned job recovery (interval: {:?})", interval);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut failures = FailureTracker::new(3);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match store.requeue_abandoned(stale_after, max_attempts).await {
                            Ok(report) => {
                                failures.record_success();
                                metrics::record_recovery(report.requeued.len(), report.failed.len());
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Abandoned job recovery failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        }))
    }

    /// Process one claimed job to a recorded outcome.
    async fn process(&self, job: Job) {
        let logger = JobLogger::new(&job, &self.config.worker_id);
        let span = logger.create_span();

        async {
            logger.log_start(job.attempts);
            metrics::record_job_claimed(job.job_type);

            let started = Instant::now();
            let outcome = self.execute(&job, &logger).await;
            metrics::record_remote_duration(job.job_type, started.elapsed().as_secs_f64());

            match outcome {
                Ok(result) => self.record_completion(&job, &logger, result, started).await,
                Err(e) => self.record_failure(&job, &logger, &e.to_string()).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &Job, logger: &JobLogger) -> WorkerResult<GenerationResult> {
        let reporter = StoreProgress {
            store: self.store.as_ref(),
            job_id: &job.id,
            worker_id: &self.config.worker_id,
            logger,
        };

        reporter.set(STARTED_PROGRESS).await;

        let workflow = self
            .workflows
            .get(&job.job_type)
            .ok_or(WorkerError::NoHandler(job.job_type))?;

        let result = workflow
            .execute(&job.parameters, self.config.submission_mode, &reporter)
            .await?;

        reporter.set(FINALIZING_PROGRESS).await;
        Ok(result)
    }

    async fn record_completion(
        &self,
        job: &Job,
        logger: &JobLogger,
        result: GenerationResult,
        started: Instant,
    ) {
        let value = match serde_json::to_value(&result) {
            Ok(value) => value,
            Err(e) => {
                self.record_failure(job, logger, &format!("failed to encode result: {}", e))
                    .await;
                return;
            }
        };

        let retry = RetryConfig::new("complete_job");
        let worker_id = self.config.worker_id.as_str();
        match retry_store(&retry, || self.store.complete(&job.id, value.clone(), worker_id)).await {
            Ok(true) => {
                metrics::record_job_completed(job.job_type);
                logger.log_completion(started.elapsed().as_secs_f64());
            }
            Ok(false) => logger.log_warning("result discarded, job cancelled or reclaimed"),
            Err(e) => logger.log_error(&format!("failed to record completion: {}", e)),
        }
    }

    async fn record_failure(&self, job: &Job, logger: &JobLogger, message: &str) {
        logger.log_error(message);

        let retry = RetryConfig::new("fail_job");
        let worker_id = self.config.worker_id.as_str();
        match retry_store(&retry, || self.store.fail(&job.id, message, worker_id)).await {
            Ok(true) => metrics::record_job_failed(job.job_type),
            Ok(false) => logger.log_warning("failure discarded, job cancelled or reclaimed"),
            Err(e) => logger.log_error(&format!("failed to record failure: {}", e)),
        }
    }
}
