//! Provider request/response types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote execution status.
///
/// The provider's queue states (`IN_QUEUE`, `IN_PROGRESS`, `TIMED_OUT`) are
/// folded into the generic lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    #[default]
    #[serde(alias = "IN_QUEUE")]
    Pending,
    #[serde(alias = "IN_PROGRESS")]
    Running,
    Completed,
    #[serde(alias = "TIMED_OUT")]
    Failed,
    Cancelled,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Pending => "PENDING",
            RemoteStatus::Running => "RUNNING",
            RemoteStatus::Completed => "COMPLETED",
            RemoteStatus::Failed => "FAILED",
            RemoteStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body for `/run` and `/runsync`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest<'a> {
    pub input: &'a Value,
}

/// Response to an asynchronous submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Provider-side job ID
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Response to a status query or a synchronous run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl StatusResponse {
    /// Output payload. `null` and empty objects, arrays or strings count
    /// as no output.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref().filter(|v| match v {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_aliases() {
        let parse = |s: &str| serde_json::from_value::<RemoteStatus>(json!(s)).unwrap();

        assert_eq!(parse("IN_QUEUE"), RemoteStatus::Pending);
        assert_eq!(parse("IN_PROGRESS"), RemoteStatus::Running);
        assert_eq!(parse("TIMED_OUT"), RemoteStatus::Failed);
        assert_eq!(parse("COMPLETED"), RemoteStatus::Completed);
        assert!(parse("CANCELLED").is_terminal());
        assert!(!parse("RUNNING").is_terminal());
    }

    #[test]
    fn test_status_response_null_output() {
        let response: StatusResponse =
            serde_json::from_value(json!({"id": "r-1", "status": "COMPLETED", "output": null}))
                .unwrap();
        assert!(response.output().is_none());
    }

    #[test]
    fn test_status_response_empty_output() {
        for empty in [json!({}), json!([]), json!("")] {
            let response: StatusResponse = serde_json::from_value(
                json!({"id": "r-1", "status": "COMPLETED", "output": empty}),
            )
            .unwrap();
            assert!(response.output().is_none());
        }

        let response: StatusResponse = serde_json::from_value(
            json!({"id": "r-1", "status": "COMPLETED", "output": {"images": []}}),
        )
        .unwrap();
        assert!(response.output().is_some());
    }
}
