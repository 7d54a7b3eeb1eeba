//! Normalized generation output.
//!
//! Providers return loosely shaped payloads. Handlers turn them into a
//! `GenerationOutput` that separates generated artifacts by media kind from
//! execution metadata, keeping the raw payload for debugging.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".avi", ".mov", ".webm"];

/// Media kind of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify an artifact by its filename extension.
    pub fn from_filename(filename: &str) -> Self {
        let lowered = filename.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.iter().any(|ext| lowered.contains(ext)) {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// A single generated file, either inline (base64) or a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Position in the provider's output list
    pub index: usize,
    pub filename: String,
    /// Encoding of `data`, e.g. `base64` or `s3_url`
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl Artifact {
    /// Build an artifact from one entry of a provider output list.
    ///
    /// Returns `None` for entries that are not JSON objects.
    pub fn from_value(index: usize, value: &Value, default_filename: &str) -> Option<Self> {
        let entry = value.as_object()?;
        let text = |key: &str| entry.get(key).and_then(Value::as_str);

        Some(Self {
            index,
            filename: text("filename")
                .map(str::to_string)
                .unwrap_or_else(|| default_filename.to_string()),
            kind: text("type").unwrap_or("base64").to_string(),
            data: text("data").unwrap_or_default().to_string(),
        })
    }

    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_filename(&self.filename)
    }
}

/// Provider output split into artifacts and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default)]
    pub images: Vec<Artifact>,
    #[serde(default)]
    pub videos: Vec<Artifact>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub raw_response: Value,
}

impl GenerationOutput {
    /// Add an artifact to the list matching its media kind.
    pub fn push_classified(&mut self, artifact: Artifact) {
        match artifact.media_kind() {
            MediaKind::Image => self.images.push(artifact),
            MediaKind::Video => self.videos.push(artifact),
        }
    }

    pub fn artifact_count(&self) -> usize {
        self.images.len() + self.videos.len()
    }
}

/// Result stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Always `completed`; kept for dashboard compatibility
    pub status: String,
    pub output: GenerationOutput,
    /// Seconds between submission and terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// Provider-side job ID
    pub remote_job_id: String,
}

impl GenerationResult {
    pub fn completed(
        output: GenerationOutput,
        execution_time: Option<f64>,
        remote_job_id: impl Into<String>,
    ) -> Self {
        Self {
            status: "completed".to_string(),
            output,
            execution_time,
            remote_job_id: remote_job_id.into(),
        }
    }
}
