//! A handler bound to a provider endpoint.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use genq_models::{GenerationResult, Parameters};

use crate::client::RemoteGeneration;
use crate::error::{ProviderError, ProviderResult};
use crate::handler::GenerationHandler;
use crate::poller::{wait_for_completion, ProgressReporter};
use crate::types::{RemoteStatus, StatusResponse, SubmitResponse};

/// Progress reported before submission.
pub const SUBMIT_PROGRESS: u8 = 25;

/// Progress reported once the provider accepted the job.
pub const SUBMITTED_PROGRESS: u8 = 50;

const NO_OUTPUT: &str = "No output received from provider";

/// How jobs are handed to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Submit, then poll the status endpoint
    #[default]
    Async,
    /// Single blocking request
    Sync,
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionMode::Async => f.write_str("async"),
            SubmissionMode::Sync => f.write_str("sync"),
        }
    }
}

impl FromStr for SubmissionMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" => Ok(SubmissionMode::Async),
            "sync" => Ok(SubmissionMode::Sync),
            other => Err(ProviderError::Config(format!(
                "unknown submission mode '{}'",
                other
            ))),
        }
    }
}

/// Generation workflow: one handler, one endpoint, one remote.
pub struct Workflow {
    handler: Arc<dyn GenerationHandler>,
    remote: Arc<dyn RemoteGeneration>,
    endpoint: String,
}

impl Workflow {
    pub fn new(
        handler: Arc<dyn GenerationHandler>,
        remote: Arc<dyn RemoteGeneration>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            remote,
            endpoint: endpoint.into(),
        }
    }

    pub fn handler(&self) -> &dyn GenerationHandler {
        self.handler.as_ref()
    }

    /// Validate and prepare, before anything goes over the network.
    fn input(&self, params: &Parameters) -> ProviderResult<serde_json::Value> {
        self.handler.validate(params)?;
        self.handler.prepare(params)
    }

    /// Queue a job on the provider without waiting for it.
    ///
    /// Transport and provider errors come back as
    /// [`ProviderError::SubmitFailed`]; validation errors are returned as is.
    pub async fn submit(&self, params: &Parameters) -> ProviderResult<SubmitResponse> {
        let input = self.input(params)?;
        self.remote
            .submit(&self.endpoint, &input)
            .await
            .map_err(ProviderError::submit_failed)
    }

    /// Fetch the current remote status once.
    pub async fn poll(&self, remote_id: &str) -> ProviderResult<StatusResponse> {
        self.remote.status(&self.endpoint, remote_id).await
    }

    /// Run in one blocking request and normalize the result.
    pub async fn run_sync(&self, params: &Parameters) -> ProviderResult<GenerationResult> {
        let input = self.input(params)?;
        let started = Instant::now();

        let response = self.remote.run_sync(&self.endpoint, &input).await?;
        self.finish(response, started)
    }

    /// Poll a submitted job until terminal and normalize the result.
    pub async fn wait_for_completion(
        &self,
        remote_id: &str,
        reporter: &dyn ProgressReporter,
    ) -> ProviderResult<GenerationResult> {
        let started = Instant::now();
        let response =
            wait_for_completion(self.handler.poll_policy(), || self.poll(remote_id), reporter)
                .await?;
        self.finish(response, started)
    }

    /// Full execution in the given mode, reporting progress along the way.
    pub async fn execute(
        &self,
        params: &Parameters,
        mode: SubmissionMode,
        reporter: &dyn ProgressReporter,
    ) -> ProviderResult<GenerationResult> {
        match mode {
            SubmissionMode::Sync => {
                reporter.report(SUBMIT_PROGRESS).await;
                self.run_sync(params).await
            }
            SubmissionMode::Async => {
                reporter.report(SUBMIT_PROGRESS).await;
                let submitted = self.submit(params).await?;
                info!(
                    remote_id = %submitted.id,
                    job_type = %self.handler.job_type(),
                    "Submitted remote job"
                );

                reporter.report(SUBMITTED_PROGRESS).await;
                self.wait_for_completion(&submitted.id, reporter).await
            }
        }
    }

    /// Map a terminal provider response to a result or an error.
    fn finish(&self, response: StatusResponse, started: Instant) -> ProviderResult<GenerationResult> {
        match response.status {
            RemoteStatus::Completed => {
                let raw = response
                    .output()
                    .ok_or_else(|| ProviderError::remote_failure(NO_OUTPUT))?;
                let output = self.handler.process_output(raw);

                Ok(GenerationResult::completed(
                    output,
                    Some(started.elapsed().as_secs_f64()),
                    response.id,
                ))
            }
            RemoteStatus::Failed => Err(ProviderError::remote_failure(
                response.error.unwrap_or_else(|| "Job failed".to_string()),
            )),
            RemoteStatus::Cancelled => Err(ProviderError::remote_failure(
                response.error.unwrap_or_else(|| "Job cancelled".to_string()),
            )),
            RemoteStatus::Pending | RemoteStatus::Running => Err(ProviderError::remote_failure(
                response.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::handler::HandlerRegistry;
    use crate::poller::{NoProgress, PollPolicy};
    use genq_models::{GenerationOutput, JobType};

    /// Remote that answers status calls from a script.
    struct ScriptedRemote {
        statuses: Mutex<Vec<StatusResponse>>,
        submits: AtomicUsize,
        reject_submit: bool,
    }

    impl ScriptedRemote {
        fn new(mut statuses: Vec<StatusResponse>) -> Arc<Self> {
            statuses.reverse();
            Arc::new(Self {
                statuses: Mutex::new(statuses),
                submits: AtomicUsize::new(0),
                reject_submit: false,
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(Vec::new()),
                submits: AtomicUsize::new(0),
                reject_submit: true,
            })
        }
    }

    #[async_trait]
    impl RemoteGeneration for ScriptedRemote {
        async fn submit(&self, _endpoint: &str, _input: &Value) -> ProviderResult<SubmitResponse> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.reject_submit {
                return Err(ProviderError::RequestFailed(
                    "HTTP error: 401 - unauthorized".to_string(),
                ));
            }
            Ok(SubmitResponse {
                id: "remote-1".to_string(),
                status: RemoteStatus::Pending,
                created_at: None,
            })
        }

        async fn status(&self, _endpoint: &str, _remote_id: &str) -> ProviderResult<StatusResponse> {
            Ok(self.statuses.lock().unwrap().pop().unwrap())
        }

        async fn run_sync(&self, _endpoint: &str, _input: &Value) -> ProviderResult<StatusResponse> {
            Ok(self.statuses.lock().unwrap().pop().unwrap())
        }
    }

    /// Image handler with a fast poll policy.
    struct FastHandler(Arc<dyn GenerationHandler>);

    impl GenerationHandler for FastHandler {
        fn job_type(&self) -> JobType {
            self.0.job_type()
        }
        fn validate(&self, params: &Parameters) -> ProviderResult<()> {
            self.0.validate(params)
        }
        fn prepare(&self, params: &Parameters) -> ProviderResult<Value> {
            self.0.prepare(params)
        }
        fn process_output(&self, raw: &Value) -> GenerationOutput {
            self.0.process_output(raw)
        }
        fn poll_policy(&self) -> PollPolicy {
            PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5))
        }
    }

    fn status(status: RemoteStatus, output: Option<Value>, error: Option<&str>) -> StatusResponse {
        StatusResponse {
            id: "remote-1".to_string(),
            status,
            output,
            error: error.map(str::to_string),
            created_at: None,
        }
    }

    fn workflow(remote: Arc<ScriptedRemote>) -> Workflow {
        let image = HandlerRegistry::with_defaults()
            .get(JobType::TextToImage)
            .unwrap();
        Workflow::new(Arc::new(FastHandler(image)), remote, "img")
    }

    fn prompt() -> Parameters {
        json!({"prompt": "a harbor"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_params_never_reach_remote() {
        let remote = ScriptedRemote::new(vec![]);
        let wf = workflow(remote.clone());

        let err = wf.submit(&Parameters::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert_eq!(remote.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_execution_completes() {
        let remote = ScriptedRemote::new(vec![
            status(RemoteStatus::Pending, None, None),
            status(RemoteStatus::Running, None, None),
            status(
                RemoteStatus::Completed,
                Some(json!({"images": [{"filename": "a.png", "data": "x"}]})),
                None,
            ),
        ]);

        let result = workflow(remote)
            .execute(&prompt(), SubmissionMode::Async, &NoProgress)
            .await
            .unwrap();

        assert_eq!(result.status, "completed");
        assert_eq!(result.remote_job_id, "remote-1");
        assert_eq!(result.output.images.len(), 1);
        assert!(result.execution_time.is_some());
    }

    #[tokio::test]
    async fn test_completed_without_output_fails() {
        let remote = ScriptedRemote::new(vec![status(RemoteStatus::Completed, None, None)]);

        let err = workflow(remote)
            .wait_for_completion("remote-1", &NoProgress)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Generation failed: No output received from provider");
    }

    #[tokio::test]
    async fn test_completed_with_empty_output_fails() {
        let remote = ScriptedRemote::new(vec![status(RemoteStatus::Completed, Some(json!({})), None)]);

        let err = workflow(remote)
            .execute(&prompt(), SubmissionMode::Async, &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RemoteFailure(_)));
        assert_eq!(err.to_string(), "Generation failed: No output received from provider");
    }

    #[tokio::test]
    async fn test_submit_failure_is_labelled() {
        let remote = ScriptedRemote::rejecting();

        let err = workflow(remote.clone())
            .execute(&prompt(), SubmissionMode::Async, &NoProgress)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to submit job: HTTP error: 401 - unauthorized"
        );
        assert_eq!(remote.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_and_cancelled_messages() {
        let remote = ScriptedRemote::new(vec![
            status(RemoteStatus::Failed, None, Some("CUDA out of memory")),
            status(RemoteStatus::Cancelled, None, None),
            status(RemoteStatus::Failed, None, None),
        ]);
        let wf = workflow(remote);

        let errors: Vec<String> = [
            wf.wait_for_completion("remote-1", &NoProgress).await,
            wf.wait_for_completion("remote-1", &NoProgress).await,
            wf.wait_for_completion("remote-1", &NoProgress).await,
        ]
        .into_iter()
        .map(|r| r.unwrap_err().to_string())
        .collect();

        assert_eq!(
            errors,
            vec![
                "Generation failed: CUDA out of memory",
                "Generation failed: Job cancelled",
                "Generation failed: Job failed",
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_mode() {
        let remote = ScriptedRemote::new(vec![status(
            RemoteStatus::Completed,
            Some(json!({"images": []})),
            None,
        )]);

        let result = workflow(remote.clone())
            .execute(&prompt(), SubmissionMode::Sync, &NoProgress)
            .await
            .unwrap();

        assert_eq!(result.output.artifact_count(), 0);
        assert_eq!(remote.submits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submission_mode_parsing() {
        assert_eq!("ASYNC".parse::<SubmissionMode>().unwrap(), SubmissionMode::Async);
        assert_eq!("sync".parse::<SubmissionMode>().unwrap(), SubmissionMode::Sync);
        assert!("batch".parse::<SubmissionMode>().is_err());
    }
}
