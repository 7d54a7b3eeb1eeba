//! Generation job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::job_status::{JobStatus, ParseEnumError};

/// Opaque generation parameters, passed through to the job's handler.
pub type Parameters = serde_json::Map<String, Value>;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of generation work a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generate images from a text prompt
    TextToImage,
    /// Generate a video from a text prompt
    TextToVideo,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::TextToImage, JobType::TextToVideo];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TextToImage => "text_to_image",
            JobType::TextToVideo => "text_to_video",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ParseEnumError;

    /// Accepts both `text_to_image` and the dashed `text-to-image` spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "text_to_image" => Ok(JobType::TextToImage),
            "text_to_video" => Ok(JobType::TextToVideo),
            _ => Err(ParseEnumError::new("job type", s)),
        }
    }
}

/// Clamp a caller-supplied progress value into `0..=100`.
pub fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

/// A generation job record as persisted in the job store.
///
/// Every mutation goes through one of the transition methods below, which
/// bump `version`. The store persists a mutation only if the stored version
/// still equals the version the mutation was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Generation parameters (opaque to the queue)
    #[serde(default)]
    pub parameters: Parameters,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Generation result, only present once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message, only present once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Priority the job was enqueued with (higher runs first)
    #[serde(default)]
    pub priority: i32,

    /// Enqueue sequence number, breaks ties between equal priorities
    #[serde(default)]
    pub queue_seq: u64,

    /// Record version, bumped on every mutation
    #[serde(default)]
    pub version: u64,

    /// Number of times a worker claimed this job
    #[serde(default)]
    pub attempts: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp (latest claim)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp (any terminal status)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker that claimed the job most recently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(job_type: JobType, parameters: Parameters, priority: i32, queue_seq: u64) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::new(),
            job_type,
            parameters,
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            priority,
            queue_seq,
            version: 0,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check whether `worker_id` currently owns this job.
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.worker_id.as_deref() == Some(worker_id)
    }

    /// Check whether `worker_id` may mutate this job: it must own it and the
    /// job must still be processing.
    pub fn accepts_update_from(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.is_owned_by(worker_id)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    /// Assign the job to a worker and mark it processing.
    pub fn start(&mut self, worker_id: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.worker_id = Some(worker_id.into());
        self.attempts += 1;
        self.touch(now);
    }

    /// Update progress, clamped to `0..=100`.
    pub fn set_progress(&mut self, progress: i64, now: DateTime<Utc>) {
        self.progress = clamp_progress(progress);
        self.touch(now);
    }

    /// Mark job as completed.
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        self.touch(now);
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.result = None;
        self.completed_at = Some(now);
        self.touch(now);
    }

    /// Mark job as cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.touch(now);
    }

    /// Put an abandoned job back into the queued state.
    ///
    /// `worker_id` is kept: it records that the job was claimed before.
    pub fn requeue(&mut self, queue_seq: u64, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.progress = 0;
        self.started_at = None;
        self.queue_seq = queue_seq;
        self.touch(now);
    }

    /// Check if a terminal job finished at or before `cutoff`.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_terminal() && self.completed_at.is_some_and(|at| at <= cutoff)
    }
}
