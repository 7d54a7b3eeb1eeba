//! Per-job-type generation handlers.
//!
//! A handler knows how to validate a job's parameters, turn them into the
//! provider input, and normalize what comes back. The registry maps job
//! types to handlers so the worker never branches on job type.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use serde_json::Value;

use genq_models::{GenerationOutput, JobType, Parameters};

use crate::error::{ProviderError, ProviderResult};
use crate::poller::PollPolicy;
use crate::text_to_image::TextToImageHandler;
use crate::text_to_video::TextToVideoHandler;

/// Workflow-specific behaviour for one job type.
pub trait GenerationHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Reject parameters the provider would not accept.
    fn validate(&self, params: &Parameters) -> ProviderResult<()>;

    /// Build the provider input. Only called after `validate` succeeded.
    fn prepare(&self, params: &Parameters) -> ProviderResult<Value>;

    /// Normalize a provider output payload.
    fn process_output(&self, raw: &Value) -> GenerationOutput;

    fn poll_policy(&self) -> PollPolicy;
}

/// Handlers keyed by job type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn GenerationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in text-to-image and text-to-video handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextToImageHandler::default()));
        registry.register(Arc::new(TextToVideoHandler::default()));
        registry
    }

    /// Register a handler, replacing any previous one for its job type.
    pub fn register(&mut self, handler: Arc<dyn GenerationHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn GenerationHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }
}

fn present<'a>(params: &'a Parameters, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

/// A non-blank string parameter, trimmed.
pub(crate) fn required_text<'a>(params: &'a Parameters, key: &str) -> ProviderResult<&'a str> {
    present(params, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::validation(format!("{} is required", key)))
}

/// An optional string parameter, trimmed; empty when absent.
pub(crate) fn optional_text<'a>(params: &'a Parameters, key: &str) -> ProviderResult<&'a str> {
    match present(params, key) {
        None => Ok(""),
        Some(v) => v
            .as_str()
            .map(str::trim)
            .ok_or_else(|| ProviderError::validation(format!("{} must be a string", key))),
    }
}

/// An optional integer parameter.
pub(crate) fn int_param(params: &Parameters, key: &str, default: i64) -> ProviderResult<i64> {
    match present(params, key) {
        None => Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| ProviderError::validation(format!("{} must be an integer", key))),
    }
}

/// An optional integer parameter that must fall in `range`.
pub(crate) fn int_in_range(
    params: &Parameters,
    key: &str,
    default: i64,
    range: RangeInclusive<i64>,
) -> ProviderResult<i64> {
    let value = int_param(params, key, default)?;
    if !range.contains(&value) {
        return Err(ProviderError::validation(format!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        )));
    }
    Ok(value)
}

/// An optional numeric parameter that must fall in `range`.
pub(crate) fn float_in_range(
    params: &Parameters,
    key: &str,
    default: f64,
    range: RangeInclusive<f64>,
) -> ProviderResult<f64> {
    let value = match present(params, key) {
        None => default,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ProviderError::validation(format!("{} must be a number", key)))?,
    };
    if !range.contains(&value) {
        return Err(ProviderError::validation(format!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        )));
    }
    Ok(value)
}

/// Set `inputs.<field>` of node `node_id` if the graph has that node.
pub(crate) fn set_node_input(graph: &mut Value, node_id: &str, field: &str, value: Value) {
    if let Some(node) = graph.get_mut(node_id).filter(|n| n.is_object()) {
        if !node.get("inputs").is_some_and(Value::is_object) {
            node["inputs"] = Value::Object(Default::default());
        }
        node["inputs"][field] = value;
    }
}

/// Collect artifacts listed under `key` of a provider output.
pub(crate) fn artifacts_under<'a>(
    raw: &'a Value,
    key: &str,
) -> impl Iterator<Item = (usize, &'a Value)> + 'a {
    raw.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
}

/// Execution metadata common to all provider outputs.
pub(crate) fn base_metadata(raw: &Value) -> serde_json::Map<String, Value> {
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "execution_time".to_string(),
        raw.get("executionTime").cloned().unwrap_or(Value::Null),
    );
    metadata.insert(
        "worker_id".to_string(),
        raw.get("id").cloned().unwrap_or(Value::Null),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_defaults() {
        let registry = HandlerRegistry::with_defaults();
        for job_type in JobType::ALL {
            assert_eq!(registry.get(job_type).unwrap().job_type(), job_type);
        }
        assert!(HandlerRegistry::new().get(JobType::TextToImage).is_none());
    }

    #[test]
    fn test_required_text() {
        let p = params(json!({"prompt": "  a cat  ", "blank": "   ", "num": 3}));
        assert_eq!(required_text(&p, "prompt").unwrap(), "a cat");
        assert!(required_text(&p, "blank").is_err());
        assert!(required_text(&p, "num").is_err());
        assert!(required_text(&p, "missing").is_err());
    }

    #[test]
    fn test_ranges() {
        let p = params(json!({"steps": 101, "cfg": 7.5, "frac": 2.5, "none": null}));
        assert!(int_in_range(&p, "steps", 20, 1..=100).is_err());
        assert_eq!(int_in_range(&p, "none", 20, 1..=100).unwrap(), 20);
        assert!(int_in_range(&p, "frac", 20, 1..=100).is_err());
        assert_eq!(float_in_range(&p, "cfg", 8.0, 0.0..=20.0).unwrap(), 7.5);
        assert_eq!(float_in_range(&p, "steps", 8.0, 0.0..=200.0).unwrap(), 101.0);
    }

    #[test]
    fn test_set_node_input_skips_missing_nodes() {
        let mut graph = json!({"6": {"class_type": "CLIPTextEncode"}});
        set_node_input(&mut graph, "6", "text", json!("hello"));
        set_node_input(&mut graph, "99", "text", json!("ignored"));

        assert_eq!(graph["6"]["inputs"]["text"], "hello");
        assert!(graph.get("99").is_none());
    }
}
