//! Worker configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use genq_provider::{HandlerRegistry, SubmissionMode, TextToImageHandler, TextToVideoHandler};

use crate::error::{WorkerError, WorkerResult};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Default worker ID: `worker-` followed by 8 hex characters.
pub fn generate_worker_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &uuid[..8])
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity used for claims, ownership checks and heartbeats
    pub worker_id: String,
    /// Sleep between claim attempts on an empty queue
    pub idle_sleep: Duration,
    /// Minimum interval between heartbeats while idle
    pub idle_heartbeat_interval: Duration,
    /// Back-off after a store error on claim
    pub error_backoff: Duration,
    /// Async (submit + poll) or sync provider calls
    pub submission_mode: SubmissionMode,
    /// Interval of the abandoned-job sweep, `None` disables it
    pub recovery_interval: Option<Duration>,
    /// Inactivity after which a processing job counts as abandoned
    pub stale_after: Duration,
    /// Claims a job may receive before the sweep fails it
    pub max_attempts: u32,
    /// API-format workflow graph for text-to-image jobs
    pub image_template: Option<PathBuf>,
    /// API-format workflow graph for text-to-video jobs
    pub video_template: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            idle_sleep: Duration::from_secs(1),
            idle_heartbeat_interval: Duration::from_secs(15),
            error_backoff: Duration::from_secs(5),
            submission_mode: SubmissionMode::Async,
            recovery_interval: Some(Duration::from_secs(60)),
            stale_after: Duration::from_secs(300), // 5 minutes
            max_attempts: 3,
            image_template: None,
            video_template: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            worker_id: std::env::var("WORKER_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.worker_id),
            idle_sleep: env_parse("WORKER_IDLE_SLEEP_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_sleep),
            idle_heartbeat_interval: env_parse("WORKER_IDLE_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_heartbeat_interval),
            error_backoff: defaults.error_backoff,
            submission_mode: env_parse("WORKER_SUBMIT_MODE").unwrap_or(defaults.submission_mode),
            // 0 disables the sweep
            recovery_interval: match env_parse::<u64>("WORKER_RECOVERY_INTERVAL_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.recovery_interval,
            },
            stale_after: env_parse("WORKER_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            image_template: std::env::var("PROVIDER_IMAGE_TEMPLATE").ok().map(PathBuf::from),
            video_template: std::env::var("PROVIDER_VIDEO_TEMPLATE").ok().map(PathBuf::from),
        }
    }

    /// Handler registry, using the configured workflow templates if any.
    pub fn handler_registry(&self) -> WorkerResult<HandlerRegistry> {
        let mut registry = HandlerRegistry::with_defaults();

        if let Some(path) = &self.image_template {
            registry.register(Arc::new(TextToImageHandler::with_template(load_template(
                path,
            )?)));
        }
        if let Some(path) = &self.video_template {
            registry.register(Arc::new(TextToVideoHandler::with_template(load_template(
                path,
            )?)));
        }

        Ok(registry)
    }
}

fn load_template(path: &Path) -> WorkerResult<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        WorkerError::config_error(format!(
            "workflow template not found at {}: {}",
            path.display(),
            e
        ))
    })?;

    serde_json::from_str(&raw).map_err(|e| {
        WorkerError::config_error(format!(
            "invalid JSON in workflow template at {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_worker_id() {
        let id = generate_worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);
        assert_ne!(id, generate_worker_id());
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.idle_sleep, Duration::from_secs(1));
        assert_eq!(config.submission_mode, SubmissionMode::Async);
        assert_eq!(config.max_attempts, 3);
        assert!(config.recovery_interval.is_some());
    }

    #[test]
    fn test_missing_template_is_config_error() {
        let config = WorkerConfig {
            image_template: Some(PathBuf::from("/nonexistent/workflow_api.json")),
            ..WorkerConfig::default()
        };

        assert!(matches!(
            config.handler_registry(),
            Err(WorkerError::Config(_))
        ));
    }
}
