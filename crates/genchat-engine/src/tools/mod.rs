mod image_edit;
mod image_generation;
mod video_generation;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use genchat_contracts::media::{path_extension, MediaKind};
use genchat_contracts::models::{Capability, ModelSelector, PerformanceMode};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::backend::{error_chain_text, MediaBackend, MediaBytes};

pub use image_edit::ImageEditTool;
pub use image_generation::ImageGenerationTool;
pub use video_generation::VideoGenerationTool;

pub const ERROR_PREFIX: &str = "Error generating";

/// Read-only per-turn configuration handed to every tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub mode: PerformanceMode,
    pub media_dir: PathBuf,
}

impl ToolContext {
    pub fn new(mode: PerformanceMode, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            media_dir: media_dir.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRequest {
    pub prompt: String,
    pub params: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: Map::new(),
        }
    }

    /// Splits agent-supplied arguments into the prompt and everything else.
    pub fn from_arguments(arguments: &Map<String, Value>) -> Self {
        let mut params = arguments.clone();
        let prompt = match params.remove("prompt") {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self { prompt, params }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// One capability of the media API behind a uniform call.
///
/// `invoke` never fails: errors from `run` come back as a status line
/// starting with [`ERROR_PREFIX`] so the agent can read and react to them.
pub trait MediaTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn capability(&self) -> Capability;
    fn description(&self) -> &'static str;
    /// JSON description of accepted arguments, shown to the LLM runtime.
    fn parameters(&self) -> Value;
    /// What the error line says failed, e.g. "images".
    fn subject(&self) -> &'static str;

    fn run(&self, request: &ToolRequest, ctx: &ToolContext) -> Result<String>;

    fn invoke(&self, request: &ToolRequest, ctx: &ToolContext) -> String {
        let started = Instant::now();
        match self.run(request, ctx) {
            Ok(status) => {
                info!(
                    tool = self.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool finished"
                );
                status
            }
            Err(err) => {
                let detail = error_chain_text(&err, 512);
                warn!(tool = self.name(), error = %detail, "tool failed");
                format!("{ERROR_PREFIX} {}: {detail}", self.subject())
            }
        }
    }
}

/// The tools an agent run may call, looked up by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn MediaTool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image generation, image edit and video generation over one backend.
    pub fn standard(backend: Arc<dyn MediaBackend>, selector: Arc<ModelSelector>) -> Self {
        let mut set = Self::new();
        set.register(ImageGenerationTool::new(backend.clone(), selector.clone()));
        set.register(ImageEditTool::new(backend.clone(), selector.clone()));
        set.register(VideoGenerationTool::new(backend, selector));
        set
    }

    pub fn register<T: MediaTool + 'static>(&mut self, tool: T) {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn MediaTool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(|tool| tool.as_ref())
    }

    pub fn for_capability(&self, capability: Capability) -> Option<&dyn MediaTool> {
        self.tools
            .iter()
            .find(|tool| tool.capability() == capability)
            .map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn describe(&self) -> Value {
        Value::Array(
            self.tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name(),
                        "description": tool.description(),
                        "arguments": tool.parameters(),
                    })
                })
                .collect(),
        )
    }
}

pub(crate) fn param_i64(
    params: &Map<String, Value>,
    key: &str,
    default: i64,
    min: i64,
    max: i64,
) -> i64 {
    let parsed = params.get(key).and_then(|value| match value {
        Value::Number(num) => num
            .as_i64()
            .or_else(|| num.as_f64().map(|float| float.round() as i64)),
        Value::String(text) => text.trim().parse::<f64>().ok().map(|float| float.round() as i64),
        _ => None,
    });
    parsed.unwrap_or(default).clamp(min, max)
}

pub(crate) fn param_f64(
    params: &Map<String, Value>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let parsed = params.get(key).and_then(|value| match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    });
    parsed
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

pub(crate) fn param_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Non-negative integer seed, if one was given.
pub(crate) fn param_seed(params: &Map<String, Value>) -> Option<i64> {
    params
        .get("seed")
        .and_then(|value| match value {
            Value::Number(num) => num.as_i64(),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        })
        .filter(|seed| *seed >= 0)
}

/// Writes downloaded bytes as-is to a uniquely named file in `dir` and keeps
/// it past the end of the call.
pub(crate) fn save_media(
    dir: &Path,
    kind: MediaKind,
    url: &str,
    media: &MediaBytes,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let ext = media_extension(kind, media.mime_type.as_deref(), url);
    let mut file = tempfile::Builder::new()
        .prefix(&format!("genchat-{}-", kind.as_str()))
        .suffix(&format!(".{ext}"))
        .tempfile_in(dir)
        .with_context(|| format!("failed to create media file in {}", dir.display()))?;
    file.write_all(&media.bytes)
        .context("failed to write media bytes")?;
    let (_, path) = file.keep().context("failed to keep media file")?;
    Ok(path)
}

fn media_extension(kind: MediaKind, mime_type: Option<&str>, url: &str) -> &'static str {
    let from_mime = mime_type
        .map(|mime| mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .and_then(|mime| match mime.as_str() {
            "image/png" => Some("png"),
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/webp" => Some("webp"),
            "video/mp4" => Some("mp4"),
            "video/webm" => Some("webm"),
            "video/quicktime" => Some("mov"),
            "video/x-msvideo" => Some("avi"),
            _ => None,
        });
    if let Some(ext) = from_mime {
        return ext;
    }
    let from_url = path_extension(url).and_then(|ext| {
        kind.extensions()
            .iter()
            .copied()
            .find(|known| *known == ext.as_str())
    });
    from_url.unwrap_or(match kind {
        MediaKind::Image => "png",
        MediaKind::Video => "mp4",
    })
}

/// Downloads every URL and saves it under the context's media dir. All or
/// nothing: files saved before a failure are removed again.
pub(crate) fn persist_all(
    backend: &dyn MediaBackend,
    ctx: &ToolContext,
    kind: MediaKind,
    urls: &[String],
) -> Result<Vec<String>> {
    let mut saved: Vec<PathBuf> = Vec::new();
    for url in urls {
        let result = backend
            .download(url)
            .and_then(|media| save_media(&ctx.media_dir, kind, url, &media));
        match result {
            Ok(path) => saved.push(path),
            Err(err) => {
                for path in &saved {
                    if let Err(remove_err) = fs::remove_file(path) {
                        warn!(
                            path = %path.display(),
                            error = %remove_err,
                            "failed to remove partial media"
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(saved
        .iter()
        .map(|path| path.to_string_lossy().to_string())
        .collect())
}
