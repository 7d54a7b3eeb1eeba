//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Concurrent modification of job {0}, gave up after retries")]
    Conflict(String),

    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn invalid_entry(msg: impl Into<String>) -> Self {
        Self::InvalidEntry(msg.into())
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Connection-level Redis failures and CAS contention qualify; bad data
    /// and protocol errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::StoreUnavailable(_) | QueueError::Conflict(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            QueueError::InvalidEntry(_) | QueueError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::Conflict("job-1".to_string()).is_transient());
        assert!(QueueError::store_unavailable("ping failed").is_transient());
        assert!(!QueueError::invalid_entry("garbage").is_transient());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!QueueError::from(json_err).is_transient());
    }
}
