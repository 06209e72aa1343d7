use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use genchat_contracts::media::{is_remote_reference, MediaKind};
use genchat_contracts::models::{Capability, ModelSelector};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{param_f64, param_seed, param_str, persist_all, MediaTool, ToolContext, ToolRequest};
use crate::backend::{extract_media_urls, MediaBackend};

pub const DEFAULT_STRENGTH: f64 = 0.8;

pub struct ImageEditTool {
    backend: Arc<dyn MediaBackend>,
    selector: Arc<ModelSelector>,
}

impl ImageEditTool {
    pub fn new(backend: Arc<dyn MediaBackend>, selector: Arc<ModelSelector>) -> Self {
        Self { backend, selector }
    }

    fn source_url(&self, raw: &str) -> Result<String> {
        if is_remote_reference(raw) {
            return Ok(raw.to_string());
        }
        let path = Path::new(raw);
        let meta = std::fs::metadata(path)
            .with_context(|| format!("source image not found: {raw}"))?;
        if !meta.is_file() {
            bail!("source image is not a file: {raw}");
        }
        self.backend
            .upload(path)
            .with_context(|| format!("failed to upload {raw}"))
    }
}

/// nano-banana edit endpoints take a list of sources and no strength.
fn build_arguments(
    prompt: &str,
    model_id: &str,
    source: String,
    params: &Map<String, Value>,
) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("prompt".to_string(), Value::String(prompt.to_string()));
    if model_id.contains("nano-banana") {
        arguments.insert("image_urls".to_string(), json!([source]));
    } else {
        let strength = param_f64(params, "strength", DEFAULT_STRENGTH, 0.0, 1.0);
        arguments.insert("image_url".to_string(), Value::String(source));
        arguments.insert("strength".to_string(), json!(strength));
    }
    if let Some(seed) = param_seed(params) {
        arguments.insert("seed".to_string(), json!(seed));
    }
    arguments
}

impl MediaTool for ImageEditTool {
    fn name(&self) -> &'static str {
        "fal_image_edit"
    }

    fn capability(&self) -> Capability {
        Capability::ImageEdit
    }

    fn description(&self) -> &'static str {
        "Edits an existing image (local path or URL) according to a text instruction."
    }

    fn parameters(&self) -> Value {
        json!({
            "image_path": "string, required: local path or URL of the image to edit",
            "prompt": "string, required: the change to make",
            "strength": "number, optional, 0.0-1.0, default 0.8",
            "model": "string, optional: 'flux-dev'; omit for the performance-mode default",
            "seed": "integer, optional"
        })
    }

    fn subject(&self) -> &'static str {
        "edited image"
    }

    fn run(&self, request: &ToolRequest, ctx: &ToolContext) -> Result<String> {
        let Some(image_path) = param_str(&request.params, "image_path")
            .or_else(|| param_str(&request.params, "image_url"))
        else {
            bail!("an image_path is required");
        };
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            bail!("a prompt is required");
        }

        let selection = self.selector.select(
            Capability::ImageEdit,
            ctx.mode,
            param_str(&request.params, "model"),
        );
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(tool = self.name(), "{reason}");
        }

        let source = self.source_url(image_path)?;
        let arguments = build_arguments(prompt, &selection.model_id, source, &request.params);
        debug!(model = %selection.model_id, "submitting image edit");
        let result = self
            .backend
            .run_job(&selection.model_id, &Value::Object(arguments))?;

        let mut urls = Vec::new();
        extract_media_urls(result.get("images").unwrap_or(&result), &mut urls);
        urls.truncate(1);
        if urls.is_empty() {
            bail!("{} returned no edited image", selection.model_id);
        }
        let paths = persist_all(self.backend.as_ref(), ctx, MediaKind::Image, &urls)?;
        Ok(format!("Edited image saved to: {}", paths.join(", ")))
    }
}
