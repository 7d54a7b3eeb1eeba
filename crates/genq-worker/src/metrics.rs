//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use genq_models::JobType;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "genq_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "genq_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "genq_jobs_failed_total";
    pub const JOBS_REQUEUED_TOTAL: &str = "genq_jobs_requeued_total";
    pub const REMOTE_POLL_DURATION_SECONDS: &str = "genq_remote_poll_duration_seconds";
}

/// Install the Prometheus recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to start metrics exporter: {}", e)))
}

pub fn record_job_claimed(job_type: JobType) {
    counter!(names::JOBS_CLAIMED_TOTAL, "type" => job_type.as_str()).increment(1);
}

pub fn record_job_completed(job_type: JobType) {
    counter!(names::JOBS_COMPLETED_TOTAL, "type" => job_type.as_str()).increment(1);
}

pub fn record_job_failed(job_type: JobType) {
    counter!(names::JOBS_FAILED_TOTAL, "type" => job_type.as_str()).increment(1);
}

/// Record the outcome of a recovery sweep.
pub fn record_recovery(requeued: usize, failed: usize) {
    counter!(names::JOBS_REQUEUED_TOTAL).increment(requeued as u64);
    counter!(names::JOBS_FAILED_TOTAL, "type" => "abandoned").increment(failed as u64);
}

/// Record time spent waiting on the remote provider.
pub fn record_remote_duration(job_type: JobType, duration_secs: f64) {
    histogram!(names::REMOTE_POLL_DURATION_SECONDS, "type" => job_type.as_str())
        .record(duration_secs);
}
