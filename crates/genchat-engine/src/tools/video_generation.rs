use std::sync::Arc;

use anyhow::{bail, Result};
use genchat_contracts::media::MediaKind;
use genchat_contracts::models::{Capability, ModelSelector};
use genchat_contracts::request::AspectRatio;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{param_i64, param_seed, param_str, persist_all, MediaTool, ToolContext, ToolRequest};
use crate::backend::{extract_media_urls, MediaBackend};

pub const DEFAULT_DURATION_S: i64 = 5;
pub const MIN_DURATION_S: i64 = 3;
pub const MAX_DURATION_S: i64 = 10;

pub struct VideoGenerationTool {
    backend: Arc<dyn MediaBackend>,
    selector: Arc<ModelSelector>,
}

impl VideoGenerationTool {
    pub fn new(backend: Arc<dyn MediaBackend>, selector: Arc<ModelSelector>) -> Self {
        Self { backend, selector }
    }
}

/// Veo endpoints expect durations like `"8s"`; the others take seconds.
fn duration_value(model_id: &str, seconds: i64) -> Value {
    if model_id.contains("veo") {
        Value::String(format!("{seconds}s"))
    } else {
        json!(seconds)
    }
}

fn build_arguments(
    prompt: &str,
    model_id: &str,
    params: &Map<String, Value>,
) -> Map<String, Value> {
    let duration = param_i64(
        params,
        "duration",
        DEFAULT_DURATION_S,
        MIN_DURATION_S,
        MAX_DURATION_S,
    );
    let mut arguments = Map::new();
    arguments.insert("prompt".to_string(), Value::String(prompt.to_string()));
    arguments.insert("duration".to_string(), duration_value(model_id, duration));
    if let Some(raw) = param_str(params, "aspect_ratio") {
        match raw.parse::<AspectRatio>() {
            Ok(ratio) => {
                arguments.insert(
                    "aspect_ratio".to_string(),
                    Value::String(ratio.video_ratio().to_string()),
                );
            }
            Err(message) => warn!("{message}"),
        }
    }
    if let Some(seed) = param_seed(params) {
        arguments.insert("seed".to_string(), json!(seed));
    }
    arguments
}

impl MediaTool for VideoGenerationTool {
    fn name(&self) -> &'static str {
        "fal_video_generation"
    }

    fn capability(&self) -> Capability {
        Capability::VideoGeneration
    }

    fn description(&self) -> &'static str {
        "Generates a short video from a text description. Use for videos, clips or animations."
    }

    fn parameters(&self) -> Value {
        json!({
            "prompt": "string, required: what the video should show",
            "duration": "integer seconds, optional, 3-10, default 5",
            "aspect_ratio": "string, optional: square, landscape_16_9, portrait_9_16, ...",
            "model": "string, optional: 'luma'; omit for the performance-mode default",
            "seed": "integer, optional"
        })
    }

    fn subject(&self) -> &'static str {
        "video"
    }

    fn run(&self, request: &ToolRequest, ctx: &ToolContext) -> Result<String> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            bail!("a prompt is required");
        }
        let selection = self.selector.select(
            Capability::VideoGeneration,
            ctx.mode,
            param_str(&request.params, "model"),
        );
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(tool = self.name(), "{reason}");
        }

        let arguments = build_arguments(prompt, &selection.model_id, &request.params);
        debug!(model = %selection.model_id, "submitting video generation");
        let result = self
            .backend
            .run_job(&selection.model_id, &Value::Object(arguments))?;

        let mut urls = Vec::new();
        extract_media_urls(result.get("video").unwrap_or(&result), &mut urls);
        urls.truncate(1);
        if urls.is_empty() {
            bail!("{} returned no video URL", selection.model_id);
        }
        let paths = persist_all(self.backend.as_ref(), ctx, MediaKind::Video, &urls)?;
        Ok(format!(
            "Generated {} video(s): {}",
            paths.len(),
            paths.join(", ")
        ))
    }
}
