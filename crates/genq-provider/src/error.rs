//! Provider client error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid input parameters: {0}")]
    Validation(String),

    #[error("{0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Job timed out after {0} seconds")]
    PollTimeout(u64),

    #[error("Generation failed: {0}")]
    RemoteFailure(String),

    #[error("Failed to submit job: {0}")]
    SubmitFailed(Box<ProviderError>),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote_failure(msg: impl Into<String>) -> Self {
        Self::RemoteFailure(msg.into())
    }

    /// Mark an error as raised while handing the job to the provider.
    pub fn submit_failed(source: ProviderError) -> Self {
        Self::SubmitFailed(Box::new(source))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ProviderError::PollTimeout(600).to_string(),
            "Job timed out after 600 seconds"
        );
        assert_eq!(
            ProviderError::remote_failure("Job cancelled").to_string(),
            "Generation failed: Job cancelled"
        );
        assert_eq!(
            ProviderError::submit_failed(ProviderError::RequestFailed(
                "HTTP error: 503 - busy".to_string()
            ))
            .to_string(),
            "Failed to submit job: HTTP error: 503 - busy"
        );
        assert!(!ProviderError::validation("prompt is required").is_retryable());
    }
}
