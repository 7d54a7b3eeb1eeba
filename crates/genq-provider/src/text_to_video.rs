//! Text-to-video handler for the Wan 2.2 ComfyUI graph.

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};

use genq_models::{Artifact, GenerationOutput, JobType, Parameters};

use crate::error::ProviderResult;
use crate::handler::{
    artifacts_under, base_metadata, float_in_range, int_in_range, int_param, optional_text,
    required_text, set_node_input, GenerationHandler,
};
use crate::poller::PollPolicy;

const POSITIVE_PROMPT_NODE: &str = "6";
const NEGATIVE_PROMPT_NODE: &str = "7";
/// High-noise and low-noise sampler passes
const SAMPLER_NODES: [&str; 2] = ["57", "58"];
const LATENT_NODE: &str = "59";
const CREATE_VIDEO_NODE: &str = "60";
const SAVE_VIDEO_NODE: &str = "61";

const DEFAULT_WIDTH: i64 = 1280;
const DEFAULT_HEIGHT: i64 = 704;
const DEFAULT_STEPS: i64 = 20;
const DEFAULT_GUIDANCE: f64 = 3.5;
const DEFAULT_FPS: i64 = 16;
const DEFAULT_LENGTH: i64 = 81;
const RANDOM_SEED: i64 = -1;
const MAX_SEED: i64 = 2_147_483_647;

const SUPPORTED_CODECS: [&str; 3] = ["h264", "h265", "libvpx-vp9"];

fn default_template() -> Value {
    json!({
        POSITIVE_PROMPT_NODE: { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
        NEGATIVE_PROMPT_NODE: { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
        "57": { "class_type": "KSamplerAdvanced", "inputs": {} },
        "58": { "class_type": "KSamplerAdvanced", "inputs": {} },
        LATENT_NODE: {
            "class_type": "EmptyHunyuanLatentVideo",
            "inputs": { "length": DEFAULT_LENGTH, "batch_size": 1 }
        },
        CREATE_VIDEO_NODE: { "class_type": "CreateVideo", "inputs": {} },
        SAVE_VIDEO_NODE: { "class_type": "SaveVideo", "inputs": {} }
    })
}

/// Generates a video from a text prompt.
///
/// Parameters: `positive_prompt` (required), `negative_prompt`, `width` and
/// `height` (64-2048, default 1280x704), `steps` (1-50, default 20),
/// `guidance_scale` (1-20, default 3.5), `seed` (-1 for random), `fps`
/// (8-30, default 16), `length` in frames, `codec`.
#[derive(Debug, Clone)]
pub struct TextToVideoHandler {
    template: Value,
}

impl Default for TextToVideoHandler {
    fn default() -> Self {
        Self::with_template(default_template())
    }
}

impl TextToVideoHandler {
    /// Use a full API-format workflow graph.
    pub fn with_template(template: Value) -> Self {
        Self { template }
    }

    fn template_length(&self) -> i64 {
        self.template[LATENT_NODE]["inputs"]["length"]
            .as_i64()
            .unwrap_or(DEFAULT_LENGTH)
    }
}

/// Map a requested codec onto one the save node accepts.
fn normalize_codec(codec: &str) -> &str {
    if SUPPORTED_CODECS.contains(&codec) {
        codec
    } else {
        "auto"
    }
}

impl GenerationHandler for TextToVideoHandler {
    fn job_type(&self) -> JobType {
        JobType::TextToVideo
    }

    fn validate(&self, params: &Parameters) -> ProviderResult<()> {
        required_text(params, "positive_prompt")?;
        optional_text(params, "negative_prompt")?;
        int_in_range(params, "width", DEFAULT_WIDTH, 64..=2048)?;
        int_in_range(params, "height", DEFAULT_HEIGHT, 64..=2048)?;
        int_in_range(params, "steps", DEFAULT_STEPS, 1..=50)?;
        float_in_range(params, "guidance_scale", DEFAULT_GUIDANCE, 1.0..=20.0)?;
        int_in_range(params, "fps", DEFAULT_FPS, 8..=30)?;
        int_param(params, "seed", RANDOM_SEED)?;
        int_param(params, "length", DEFAULT_LENGTH)?;
        optional_text(params, "codec")?;
        Ok(())
    }

    fn prepare(&self, params: &Parameters) -> ProviderResult<Value> {
        let positive_prompt = required_text(params, "positive_prompt")?;
        let negative_prompt = optional_text(params, "negative_prompt")?;
        let width = int_in_range(params, "width", DEFAULT_WIDTH, 64..=2048)?;
        let height = int_in_range(params, "height", DEFAULT_HEIGHT, 64..=2048)?;
        let steps = int_in_range(params, "steps", DEFAULT_STEPS, 1..=50)?;
        let guidance = float_in_range(params, "guidance_scale", DEFAULT_GUIDANCE, 1.0..=20.0)?;
        let fps = int_in_range(params, "fps", DEFAULT_FPS, 8..=30)?;
        let length = int_param(params, "length", self.template_length())?;
        let codec = normalize_codec(optional_text(params, "codec")?);

        let mut seed = int_param(params, "seed", RANDOM_SEED)?;
        if seed == RANDOM_SEED {
            seed = rand::thread_rng().gen_range(0..=MAX_SEED);
        }

        let mut graph = self.template.clone();
        set_node_input(&mut graph, POSITIVE_PROMPT_NODE, "text", json!(positive_prompt));
        set_node_input(&mut graph, NEGATIVE_PROMPT_NODE, "text", json!(negative_prompt));

        for node in SAMPLER_NODES {
            set_node_input(&mut graph, node, "noise_seed", json!(seed));
            set_node_input(&mut graph, node, "steps", json!(steps));
            set_node_input(&mut graph, node, "cfg", json!(guidance));
        }

        set_node_input(&mut graph, LATENT_NODE, "width", json!(width));
        set_node_input(&mut graph, LATENT_NODE, "height", json!(height));
        set_node_input(&mut graph, LATENT_NODE, "length", json!(length));

        set_node_input(&mut graph, CREATE_VIDEO_NODE, "fps", json!(fps));

        set_node_input(&mut graph, SAVE_VIDEO_NODE, "codec", json!(codec));
        set_node_input(&mut graph, SAVE_VIDEO_NODE, "format", json!("auto"));

        Ok(json!({ "workflow": graph }))
    }

    /// Videos may come back under `videos` or `images` depending on the save
    /// node; both lists are classified by file extension.
    fn process_output(&self, raw: &Value) -> GenerationOutput {
        let mut output = GenerationOutput {
            metadata: base_metadata(raw),
            raw_response: raw.clone(),
            ..Default::default()
        };

        for key in ["videos", "images"] {
            for (i, item) in artifacts_under(raw, key) {
                if let Some(artifact) = Artifact::from_value(i, item, &format!("video_{}.mp4", i)) {
                    output.push_classified(artifact);
                }
            }
        }

        output.metadata.insert("model".to_string(), json!("wan-2.2"));
        output
            .metadata
            .insert("workflow_type".to_string(), json!("text-to-video"));

        output
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(10), Duration::from_secs(900))
    }
}
