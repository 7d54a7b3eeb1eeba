//! Worker error types.

use thiserror::Error;

use genq_models::JobType;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No handler registered for job type {0}")]
    NoHandler(JobType),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] genq_queue::QueueError),

    #[error(transparent)]
    Provider(#[from] genq_provider::ProviderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genq_provider::ProviderError;

    #[test]
    fn test_provider_errors_keep_their_message() {
        let err: WorkerError = ProviderError::remote_failure("boom").into();
        assert_eq!(err.to_string(), "Generation failed: boom");
    }

    #[test]
    fn test_no_handler_message() {
        assert_eq!(
            WorkerError::NoHandler(JobType::TextToVideo).to_string(),
            "No handler registered for job type text_to_video"
        );
    }
}
