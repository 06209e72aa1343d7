use std::sync::Arc;

use anyhow::{bail, Result};
use genchat_contracts::media::MediaKind;
use genchat_contracts::models::{Capability, ModelSelector};
use genchat_contracts::request::{AspectRatio, MAX_INFERENCE_STEPS, MIN_INFERENCE_STEPS};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{param_i64, param_seed, param_str, persist_all, MediaTool, ToolContext, ToolRequest};
use crate::backend::{extract_media_urls, MediaBackend};

pub const DEFAULT_SIZE: i64 = 720;
pub const MIN_SIZE: i64 = 64;
pub const MAX_SIZE: i64 = 2048;
pub const MAX_IMAGES: i64 = 4;

pub struct ImageGenerationTool {
    backend: Arc<dyn MediaBackend>,
    selector: Arc<ModelSelector>,
}

impl ImageGenerationTool {
    pub fn new(backend: Arc<dyn MediaBackend>, selector: Arc<ModelSelector>) -> Self {
        Self { backend, selector }
    }

    fn build_arguments(
        prompt: &str,
        model_id: &str,
        params: &Map<String, Value>,
    ) -> Map<String, Value> {
        let num_images = param_i64(params, "num_images", 1, 1, MAX_IMAGES);
        let default_steps = if model_id.contains("nano-banana") { 12 } else { 28 };
        let steps = param_i64(
            params,
            "num_inference_steps",
            default_steps,
            MIN_INFERENCE_STEPS as i64,
            MAX_INFERENCE_STEPS as i64,
        );

        let mut arguments = Map::new();
        arguments.insert("prompt".to_string(), Value::String(prompt.to_string()));
        arguments.insert("num_images".to_string(), json!(num_images));
        arguments.insert("num_inference_steps".to_string(), json!(steps));

        let aspect =
            param_str(params, "aspect_ratio").and_then(|raw| match raw.parse::<AspectRatio>() {
                Ok(ratio) => Some(ratio),
                Err(message) => {
                    warn!("{message}");
                    None
                }
            });
        let explicit_size = params.contains_key("width") || params.contains_key("height");
        match aspect {
            Some(ratio) if !explicit_size => {
                arguments.insert(
                    "image_size".to_string(),
                    Value::String(ratio.image_size_preset().to_string()),
                );
            }
            _ => {
                let width = param_i64(params, "width", DEFAULT_SIZE, MIN_SIZE, MAX_SIZE);
                let height = param_i64(params, "height", DEFAULT_SIZE, MIN_SIZE, MAX_SIZE);
                arguments.insert(
                    "image_size".to_string(),
                    json!({ "width": width, "height": height }),
                );
            }
        }

        if let Some(seed) = param_seed(params) {
            arguments.insert("seed".to_string(), json!(seed));
        }
        if let Some(negative) = param_str(params, "negative_prompt") {
            arguments.insert(
                "negative_prompt".to_string(),
                Value::String(negative.to_string()),
            );
        }
        arguments
    }
}

impl MediaTool for ImageGenerationTool {
    fn name(&self) -> &'static str {
        "fal_image_generation"
    }

    fn capability(&self) -> Capability {
        Capability::ImageGeneration
    }

    fn description(&self) -> &'static str {
        "Generates new images from a text description. Use when the user wants to create an image."
    }

    fn parameters(&self) -> Value {
        json!({
            "prompt": "string, required: what the image should show",
            "model": "string, optional: 'nano-banana', 'flux-schnell' or 'flux-pro'; omit for the performance-mode default",
            "width": "integer, optional, 64-2048, default 720",
            "height": "integer, optional, 64-2048, default 720",
            "num_images": "integer, optional, 1-4, default 1",
            "aspect_ratio": "string, optional: square, landscape_4_3, landscape_16_9, portrait_3_4, portrait_9_16",
            "num_inference_steps": "integer, optional, 1-50",
            "seed": "integer, optional",
            "negative_prompt": "string, optional"
        })
    }

    fn subject(&self) -> &'static str {
        "images"
    }

    fn run(&self, request: &ToolRequest, ctx: &ToolContext) -> Result<String> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            bail!("a prompt is required");
        }
        let selection = self.selector.select(
            Capability::ImageGeneration,
            ctx.mode,
            param_str(&request.params, "model"),
        );
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(tool = self.name(), "{reason}");
        }

        let arguments = Self::build_arguments(prompt, &selection.model_id, &request.params);
        let wanted = arguments
            .get("num_images")
            .and_then(Value::as_u64)
            .unwrap_or(1) as usize;
        debug!(model = %selection.model_id, num_images = wanted, "submitting image generation");

        let result = self
            .backend
            .run_job(&selection.model_id, &Value::Object(arguments))?;
        let mut urls = Vec::new();
        extract_media_urls(result.get("images").unwrap_or(&result), &mut urls);
        urls.truncate(wanted);
        if urls.is_empty() {
            bail!("{} returned no image URLs", selection.model_id);
        }

        let paths = persist_all(self.backend.as_ref(), ctx, MediaKind::Image, &urls)?;
        Ok(format!(
            "Generated {} image(s): {}",
            paths.len(),
            paths.join(", ")
        ))
    }
}
