//! Backoff helpers for job store writes.
//!
//! A worker that finished a remote job must not lose the outcome to a short
//! Redis outage, so final status writes are retried. Only errors the store
//! marks transient are repeated.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use genq_queue::QueueResult;

/// Backoff schedule for one named store operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First delay, doubled on every retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Shown in logs
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            operation_name: "store_write".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }
}

/// Run a store operation, repeating it while it fails transiently.
///
/// Permanent errors and the error of the last allowed attempt are returned
/// unchanged.
pub async fn retry_store<F, Fut, T>(config: &RetryConfig, operation: F) -> QueueResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    let mut retry = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_transient() || retry >= config.max_retries {
            return Err(err);
        }

        let delay = config.backoff(retry);
        retry += 1;
        debug!(
            operation = %config.operation_name,
            retry,
            ?delay,
            "Transient store error, retrying: {}",
            err
        );
        tokio::time::sleep(delay).await;
    }
}

/// Counts consecutive failures of a repeating operation and rate-limits
/// their logging.
///
/// The claim loop and the recovery sweep run forever; during an outage they
/// log the first few failures, then one suppression notice, then nothing
/// until the operation succeeds again.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            consecutive: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.log_limit {
            warn!("Recovered after {} consecutive failures", self.consecutive);
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;

        if self.consecutive == self.log_limit + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.log_limit
            );
        }
        self.consecutive <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
