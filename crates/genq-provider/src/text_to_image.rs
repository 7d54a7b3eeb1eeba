//! Text-to-image handler for ComfyUI-style provider endpoints.

use std::time::Duration;

use serde_json::{json, Value};

use genq_models::{Artifact, GenerationOutput, JobType, Parameters};

use crate::error::ProviderResult;
use crate::handler::{
    artifacts_under, base_metadata, float_in_range, int_in_range, int_param, optional_text,
    required_text, set_node_input, GenerationHandler,
};
use crate::poller::PollPolicy;

const POSITIVE_PROMPT_NODE: &str = "6";
const SAMPLER_NODE: &str = "8";
const NEGATIVE_PROMPT_NODE: &str = "10";

const DEFAULT_STEPS: i64 = 20;
const DEFAULT_GUIDANCE: f64 = 8.0;

/// Minimal API-format graph holding the nodes this handler fills in.
/// Deployments normally load their full graph with [`TextToImageHandler::with_template`].
fn default_template() -> Value {
    json!({
        POSITIVE_PROMPT_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["11", 0] }
        },
        NEGATIVE_PROMPT_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["11", 0] }
        },
        SAMPLER_NODE: {
            "class_type": "KSampler",
            "inputs": {
                "model": ["12", 0],
                "positive": [POSITIVE_PROMPT_NODE, 0],
                "negative": [NEGATIVE_PROMPT_NODE, 0],
                "latent_image": ["5", 0]
            }
        }
    })
}

/// Generates images from a text prompt.
///
/// Parameters: `prompt` (required), `negative_prompt`, `steps` (1-100,
/// default 20), `guidance_scale` (0-20, default 8.0), `seed` (0 lets the
/// provider pick one).
#[derive(Debug, Clone)]
pub struct TextToImageHandler {
    template: Value,
}

impl Default for TextToImageHandler {
    fn default() -> Self {
        Self::with_template(default_template())
    }
}

impl TextToImageHandler {
    /// Use a full API-format workflow graph.
    pub fn with_template(template: Value) -> Self {
        Self { template }
    }
}

impl GenerationHandler for TextToImageHandler {
    fn job_type(&self) -> JobType {
        JobType::TextToImage
    }

    fn validate(&self, params: &Parameters) -> ProviderResult<()> {
        required_text(params, "prompt")?;
        optional_text(params, "negative_prompt")?;
        int_in_range(params, "steps", DEFAULT_STEPS, 1..=100)?;
        float_in_range(params, "guidance_scale", DEFAULT_GUIDANCE, 0.0..=20.0)?;
        int_param(params, "seed", 0)?;
        Ok(())
    }

    fn prepare(&self, params: &Parameters) -> ProviderResult<Value> {
        let prompt = required_text(params, "prompt")?;
        let negative_prompt = optional_text(params, "negative_prompt")?;
        let steps = int_in_range(params, "steps", DEFAULT_STEPS, 1..=100)?;
        let guidance = float_in_range(params, "guidance_scale", DEFAULT_GUIDANCE, 0.0..=20.0)?;
        let seed = int_param(params, "seed", 0)?;

        let mut graph = self.template.clone();
        set_node_input(&mut graph, POSITIVE_PROMPT_NODE, "text", json!(prompt));
        set_node_input(&mut graph, NEGATIVE_PROMPT_NODE, "text", json!(negative_prompt));

        let control = if seed > 0 { "fixed" } else { "randomize" };
        for (field, value) in [
            ("seed", json!(seed)),
            ("control_after_generate", json!(control)),
            ("steps", json!(steps)),
            ("cfg", json!(guidance)),
            ("sampler_name", json!("euler")),
            ("scheduler", json!("normal")),
            ("denoise", json!(1.0)),
        ] {
            set_node_input(&mut graph, SAMPLER_NODE, field, value);
        }

        Ok(json!({ "workflow": graph }))
    }

    fn process_output(&self, raw: &Value) -> GenerationOutput {
        let mut output = GenerationOutput {
            metadata: base_metadata(raw),
            raw_response: raw.clone(),
            ..Default::default()
        };

        output.images = artifacts_under(raw, "images")
            .filter_map(|(i, item)| Artifact::from_value(i, item, &format!("image_{}.png", i)))
            .collect();

        output
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validation() {
        let handler = TextToImageHandler::default();

        assert!(handler.validate(&params(json!({"prompt": "a castle"}))).is_ok());
        assert!(handler.validate(&params(json!({"prompt": "   "}))).is_err());
        assert!(handler.validate(&params(json!({}))).is_err());
        assert!(handler
            .validate(&params(json!({"prompt": "x", "steps": 0})))
            .is_err());
        assert!(handler
            .validate(&params(json!({"prompt": "x", "steps": 100, "guidance_scale": 20})))
            .is_ok());
        assert!(handler
            .validate(&params(json!({"prompt": "x", "guidance_scale": 20.5})))
            .is_err());
    }

    #[test]
    fn test_prepare_fills_graph() {
        let handler = TextToImageHandler::default();
        let input = handler
            .prepare(&params(json!({
                "prompt": "  a castle  ",
                "negative_prompt": "blurry",
                "steps": 30,
                "seed": 42
            })))
            .unwrap();

        let graph = &input["workflow"];
        assert_eq!(graph["6"]["inputs"]["text"], "a castle");
        assert_eq!(graph["10"]["inputs"]["text"], "blurry");
        assert_eq!(graph["8"]["inputs"]["steps"], 30);
        assert_eq!(graph["8"]["inputs"]["cfg"], 8.0);
        assert_eq!(graph["8"]["inputs"]["seed"], 42);
        assert_eq!(graph["8"]["inputs"]["control_after_generate"], "fixed");
        // Connections from the template survive
        assert_eq!(graph["8"]["inputs"]["positive"], json!(["6", 0]));
    }

    #[test]
    fn test_default_seed_randomizes() {
        let input = TextToImageHandler::default()
            .prepare(&params(json!({"prompt": "x"})))
            .unwrap();
        assert_eq!(input["workflow"]["8"]["inputs"]["control_after_generate"], "randomize");
    }

    #[test]
    fn test_process_output() {
        let raw = json!({
            "id": "worker-77",
            "executionTime": 4200,
            "images": [
                {"filename": "ComfyUI_0001.png", "type": "s3_url", "data": "https://bucket/x.png"},
                {"data": "aGVsbG8="},
                "skipped"
            ]
        });

        let output = TextToImageHandler::default().process_output(&raw);

        assert_eq!(output.images.len(), 2);
        assert_eq!(output.images[0].kind, "s3_url");
        assert_eq!(output.images[1].filename, "image_1.png");
        assert_eq!(output.images[1].kind, "base64");
        assert!(output.videos.is_empty());
        assert_eq!(output.metadata["execution_time"], 4200);
        assert_eq!(output.metadata["worker_id"], "worker-77");
        assert_eq!(output.raw_response, raw);
    }
}
