//! Polling a submitted job until it reaches a terminal status.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::progress::{estimate_progress, POLL_PROGRESS_CAP, POLL_PROGRESS_FLOOR};
use crate::types::StatusResponse;

/// How often and for how long a job is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }
}

/// Receives progress estimates while a job is polled.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8);
}

/// Reporter that drops every update.
pub struct NoProgress;

#[async_trait]
impl ProgressReporter for NoProgress {
    async fn report(&self, _progress: u8) {}
}

/// Poll until the job is terminal or the budget runs out.
///
/// Between polls the estimated progress is reported. Exceeding the budget
/// fails with [`ProviderError::PollTimeout`]; errors from `poll` itself are
/// returned as-is.
pub async fn wait_for_completion<P, Fut>(
    policy: PollPolicy,
    mut poll: P,
    reporter: &dyn ProgressReporter,
) -> ProviderResult<StatusResponse>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<StatusResponse>>,
{
    let started = Instant::now();

    loop {
        let status = poll().await?;
        if status.status.is_terminal() {
            debug!(
                remote_id = %status.id,
                status = %status.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Remote job finished"
            );
            return Ok(status);
        }

        let elapsed = started.elapsed();
        if elapsed > policy.budget {
            return Err(ProviderError::PollTimeout(policy.budget.as_secs()));
        }

        reporter
            .report(estimate_progress(
                elapsed,
                policy.budget,
                POLL_PROGRESS_FLOOR,
                POLL_PROGRESS_CAP,
            ))
            .await;

        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::RemoteStatus;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u8>>);

    #[async_trait]
    impl ProgressReporter for Recorder {
        async fn report(&self, progress: u8) {
            self.0.lock().unwrap().push(progress);
        }
    }

    fn response(status: RemoteStatus) -> StatusResponse {
        StatusResponse {
            id: "r-1".to_string(),
            status,
            output: None,
            error: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_polls_until_terminal() {
        let script = Mutex::new(vec![
            RemoteStatus::Completed,
            RemoteStatus::Running,
            RemoteStatus::Pending,
        ]);
        let recorder = Recorder::default();
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(60));

        let status = wait_for_completion(
            policy,
            || {
                let next = script.lock().unwrap().pop().unwrap();
                async move { Ok(response(next)) }
            },
            &recorder,
        )
        .await
        .unwrap();

        assert_eq!(status.status, RemoteStatus::Completed);
        let reported = recorder.0.lock().unwrap().clone();
        assert_eq!(reported.len(), 2);
        assert!(reported.iter().all(|p| (50..=90).contains(p)));
    }

    #[tokio::test]
    async fn test_budget_exceeded() {
        let policy = PollPolicy::new(Duration::from_millis(5), Duration::from_millis(20));

        let err = wait_for_completion(
            policy,
            || async { Ok(response(RemoteStatus::Running)) },
            &NoProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::PollTimeout(0)));
    }

    #[tokio::test]
    async fn test_poll_error_propagates() {
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(1));

        let err = wait_for_completion(
            policy,
            || async { Err(ProviderError::RequestFailed("HTTP error: 404 - gone".to_string())) },
            &NoProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }
}
