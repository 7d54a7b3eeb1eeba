//! Structured logging for the worker and CLI.
//!
//! Provides subscriber setup and a per-job logger that attaches job context
//! to every event.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use genq_models::{Job, JobId, JobType};

/// Initialize tracing with colored output for dev, JSON for production.
///
/// `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides levels.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genq=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    job_type: JobType,
    worker_id: String,
}

impl JobLogger {
    pub fn new(job: &Job, worker_id: &str) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type,
            worker_id: worker_id.to_string(),
        }
    }

    pub fn log_start(&self, attempt: u32) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker_id = %self.worker_id,
            attempt,
            "Job started"
        );
    }

    pub fn log_progress(&self, progress: u8) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            progress,
            "Job progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker_id = %self.worker_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker_id = %self.worker_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            elapsed_secs,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Span wrapping all work on this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker_id = %self.worker_id
        )
    }
}
