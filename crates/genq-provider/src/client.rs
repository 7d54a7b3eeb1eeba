//! Provider HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use genq_models::JobType;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{RunRequest, StatusResponse, SubmitResponse};

const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Remote execution surface used by workflows.
///
/// `endpoint` selects the deployed model on the provider side.
#[async_trait]
pub trait RemoteGeneration: Send + Sync {
    /// Queue a job without waiting for it.
    async fn submit(&self, endpoint: &str, input: &Value) -> ProviderResult<SubmitResponse>;

    /// Current status of a previously submitted job.
    async fn status(&self, endpoint: &str, remote_id: &str) -> ProviderResult<StatusResponse>;

    /// Run a job and wait for its terminal status in one request.
    async fn run_sync(&self, endpoint: &str, input: &Value) -> ProviderResult<StatusResponse>;
}

/// Configuration for the provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL, endpoint IDs are appended to it
    pub base_url: String,
    /// Bearer credential
    pub api_key: String,
    /// Endpoint serving text-to-image jobs
    pub image_endpoint: String,
    /// Endpoint serving text-to-video jobs
    pub video_endpoint: String,
    /// Timeout for `/run`
    pub submit_timeout: Duration,
    /// Timeout for `/status`
    pub status_timeout: Duration,
    /// Timeout for `/runsync`
    pub sync_timeout: Duration,
    /// Retries for idempotent status reads
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.runpod.ai/v2".to_string(),
            api_key: String::new(),
            image_endpoint: String::new(),
            video_endpoint: String::new(),
            submit_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl ProviderConfig {
    /// Create config from environment variables.
    ///
    /// The video endpoint falls back to the image endpoint when unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let image_endpoint = std::env::var("PROVIDER_IMAGE_ENDPOINT").unwrap_or_default();

        Self {
            base_url: std::env::var("PROVIDER_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("PROVIDER_API_KEY").unwrap_or_default(),
            video_endpoint: std::env::var("PROVIDER_VIDEO_ENDPOINT")
                .unwrap_or_else(|_| image_endpoint.clone()),
            image_endpoint,
            max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        }
    }

    /// Endpoint ID serving `job_type`.
    pub fn endpoint_for(&self, job_type: JobType) -> &str {
        match job_type {
            JobType::TextToImage => &self.image_endpoint,
            JobType::TextToVideo => &self.video_endpoint,
        }
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Config("PROVIDER_API_KEY is not set".to_string()));
        }
        for job_type in JobType::ALL {
            if self.endpoint_for(job_type).trim().is_empty() {
                return Err(ProviderError::Config(format!(
                    "no provider endpoint configured for {}",
                    job_type
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client for the remote provider.
pub struct ProviderClient {
    http: Client,
    config: ProviderConfig,
}

impl ProviderClient {
    /// Create a new provider client.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ProviderConfig::from_env())
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, endpoint: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint,
            path
        )
    }

    fn authorized(&self, request: RequestBuilder, timeout: Duration) -> RequestBuilder {
        request.bearer_auth(&self.config.api_key).timeout(timeout)
    }

    /// Turn non-2xx responses into `RequestFailed` carrying the body.
    async fn check(response: Response) -> ProviderResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::RequestFailed(format!(
            "HTTP error: {} - {}",
            status.as_u16(),
            body
        )))
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(
                        "Provider request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ProviderError::RequestFailed("Unknown error".to_string())))
    }
}

/// Backoff before retry number `attempt + 1`: 500 ms doubling, capped.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS)
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY)
}

#[async_trait]
impl RemoteGeneration for ProviderClient {
    async fn submit(&self, endpoint: &str, input: &Value) -> ProviderResult<SubmitResponse> {
        let url = self.url(endpoint, "run");
        debug!("Submitting job to {}", url);

        let response = self
            .authorized(self.http.post(&url), self.config.submit_timeout)
            .json(&RunRequest { input })
            .send()
            .await?;

        let submitted: SubmitResponse = Self::check(response).await?.json().await?;
        if submitted.id.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "submission response has no job id".to_string(),
            ));
        }

        Ok(submitted)
    }

    async fn status(&self, endpoint: &str, remote_id: &str) -> ProviderResult<StatusResponse> {
        let url = self.url(endpoint, &format!("status/{}", remote_id));

        let response = self
            .with_retry(|| async {
                self.authorized(self.http.get(&url), self.config.status_timeout)
                    .send()
                    .await
                    .map_err(ProviderError::Network)
            })
            .await?;

        let mut status: StatusResponse = Self::check(response).await?.json().await?;
        if status.id.is_empty() {
            status.id = remote_id.to_string();
        }
        Ok(status)
    }

    async fn run_sync(&self, endpoint: &str, input: &Value) -> ProviderResult<StatusResponse> {
        let url = self.url(endpoint, "runsync");
        debug!("Running job synchronously at {}", url);

        let response = self
            .authorized(self.http.post(&url), self.config.sync_timeout)
            .json(&RunRequest { input })
            .send()
            .await?;

        let mut status: StatusResponse = Self::check(response).await?.json().await?;
        if status.id.is_empty() {
            status.id = "sync-request".to_string();
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::RemoteStatus;

    fn client_for(server: &MockServer) -> ProviderClient {
        ProviderClient::new(ProviderConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            image_endpoint: "img-endpoint".to_string(),
            video_endpoint: "vid-endpoint".to_string(),
            max_retries: 0,
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.base_url, "https://api.runpod.ai/v2");
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.status_timeout, Duration::from_secs(10));
        assert_eq!(config.sync_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_retry_delay_saturates() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(54), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let config = ProviderConfig {
            image_endpoint: "a".to_string(),
            video_endpoint: "b".to_string(),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            ProviderClient::new(config),
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_sends_bearer_and_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/img-endpoint/run"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(json!({"input": {"workflow": {}}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "r-1", "status": "IN_QUEUE"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let submitted = client
            .submit("img-endpoint", &json!({"workflow": {}}))
            .await
            .unwrap();

        assert_eq!(submitted.id, "r-1");
        assert_eq!(submitted.status, RemoteStatus::Pending);
    }

    #[tokio::test]
    async fn test_http_error_carries_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/img-endpoint/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .submit("img-endpoint", &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "HTTP error: 500 - boom");
    }

    #[tokio::test]
    async fn test_status_parses_terminal_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vid-endpoint/status/r-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "COMPLETED",
                "output": {"videos": [{"filename": "out.mp4", "data": "AAAA"}]}
            })))
            .mount(&server)
            .await;

        let status = client_for(&server)
            .status("vid-endpoint", "r-9")
            .await
            .unwrap();

        assert_eq!(status.id, "r-9");
        assert_eq!(status.status, RemoteStatus::Completed);
        assert!(status.output().is_some());
    }

    #[tokio::test]
    async fn test_run_sync_posts_to_runsync() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/img-endpoint/runsync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sync-1",
                "status": "FAILED",
                "error": "out of memory"
            })))
            .mount(&server)
            .await;

        let status = client_for(&server)
            .run_sync("img-endpoint", &json!({}))
            .await
            .unwrap();

        assert_eq!(status.status, RemoteStatus::Failed);
        assert_eq!(status.error.as_deref(), Some("out of memory"));
    }
}
