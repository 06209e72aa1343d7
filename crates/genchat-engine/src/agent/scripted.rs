use genchat_contracts::context::current_request;
use genchat_contracts::media::{extract_media_references, MediaKind};
use genchat_contracts::request::{split_request, RequestConstraints};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{invoke_tool, AgentRuntime, StepMemory};
use crate::error::AgentResult;
use crate::tools::{ToolContext, ToolSet, ERROR_PREFIX};

const VIDEO_WORDS: &[&str] = &["video", "clip", "animation", "animate", "movie", "footage"];
const EDIT_WORDS: &[&str] = &[
    "edit", "modify", "change", "make it", "turn it", "transform", "replace", "remove", "add ",
];
const IMAGE_WORDS: &[&str] = &[
    "image", "picture", "photo", "draw", "paint", "illustration", "render", "generate", "create",
    "sketch", "portrait", "logo",
];

pub const CHAT_REPLY: &str = "I can generate images and short videos, or edit an image you upload. \
Try something like \"Generate a picture of a red apple\".";

#[derive(Debug, Clone, PartialEq)]
enum Route {
    Edit { image_path: String },
    Video,
    Image,
    Chat,
}

/// Offline runtime that routes the current request to one tool by keyword.
/// At most one tool step per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedRuntime;

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn route(body: &str, constraints: &RequestConstraints) -> Route {
    let lowered = body.to_ascii_lowercase();
    let source = constraints
        .upload
        .clone()
        .filter(|path| MediaKind::from_path(path) == Some(MediaKind::Image))
        .or_else(|| {
            extract_media_references(body, MediaKind::Image)
                .into_iter()
                .next()
        });

    if contains_any(&lowered, VIDEO_WORDS) {
        return Route::Video;
    }
    if let Some(image_path) = source {
        if contains_any(&lowered, EDIT_WORDS) || constraints.upload.is_some() {
            return Route::Edit { image_path };
        }
    }
    if contains_any(&lowered, IMAGE_WORDS) {
        return Route::Image;
    }
    Route::Chat
}

fn generation_arguments(
    body: &str,
    constraints: &RequestConstraints,
    video: bool,
) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("prompt".to_string(), Value::String(body.to_string()));
    if let Some(ratio) = constraints.aspect_ratio {
        args.insert("aspect_ratio".to_string(), json!(ratio.as_str()));
    }
    if let Some(seed) = constraints.seed {
        args.insert("seed".to_string(), json!(seed));
    }
    if !video {
        if let Some(steps) = constraints.inference_steps {
            args.insert("num_inference_steps".to_string(), json!(steps));
        }
        if let Some(negative) = constraints.negative_prompt.as_deref() {
            args.insert("negative_prompt".to_string(), json!(negative));
        }
    }
    args
}

impl AgentRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(
        &self,
        context: &str,
        tools: &ToolSet,
        ctx: &ToolContext,
        memory: &StepMemory,
    ) -> AgentResult<String> {
        let (body, constraints) = split_request(current_request(context));
        let route = route(&body, &constraints);
        debug!(?route, "scripted route");

        let (tool, args) = match route {
            Route::Chat => {
                memory.push(None, Some(CHAT_REPLY));
                return Ok(CHAT_REPLY.to_string());
            }
            Route::Video => (
                "fal_video_generation",
                generation_arguments(&body, &constraints, true),
            ),
            Route::Image => (
                "fal_image_generation",
                generation_arguments(&body, &constraints, false),
            ),
            Route::Edit { image_path } => {
                let mut args = Map::new();
                args.insert("prompt".to_string(), Value::String(body.clone()));
                args.insert("image_path".to_string(), Value::String(image_path));
                if let Some(seed) = constraints.seed {
                    args.insert("seed".to_string(), json!(seed));
                }
                ("fal_image_edit", args)
            }
        };

        let observation = invoke_tool(tools, tool, &args, ctx, memory)?;
        let answer = if observation.starts_with(ERROR_PREFIX) {
            format!("I wasn't able to finish that. {observation}")
        } else {
            observation
        };
        memory.push(None, Some(&answer));
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use genchat_contracts::context::build_context_for_request;
    use genchat_contracts::models::{ModelSelector, PerformanceMode};
    use genchat_contracts::request::{
        compose_request, split_request, AspectRatio, GenerationPreferences,
    };
    use serde_json::json;

    use super::{route, Route, ScriptedRuntime, CHAT_REPLY};
    use crate::agent::{AgentRuntime, StepMemory};
    use crate::tools::testing::FakeBackend;
    use crate::tools::{ToolContext, ToolSet};

    #[test]
    fn routes_by_keyword() {
        let none = Default::default();
        assert_eq!(route("Generate a picture of a red apple", &none), Route::Image);
        assert_eq!(route("make a short video of waves", &none), Route::Video);
        assert_eq!(route("hello there", &none), Route::Chat);
    }

    #[test]
    fn upload_routes_to_edit() {
        let composed = compose_request(
            "make it look like winter",
            &GenerationPreferences::default(),
            Some("/tmp/house.png"),
        );
        let (body, constraints) = split_request(&composed);
        assert_eq!(
            route(&body, &constraints),
            Route::Edit {
                image_path: "/tmp/house.png".to_string()
            }
        );
    }

    #[test]
    fn image_request_calls_tool_with_constraints() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(FakeBackend::replying(json!({
            "images": [{"url": "https://cdn.invalid/apple.png"}]
        })));
        let tools = ToolSet::standard(backend.clone(), Arc::new(ModelSelector::default()));
        let ctx = ToolContext::new(PerformanceMode::Fast, temp.path());
        let prefs = GenerationPreferences {
            aspect_ratio: AspectRatio::Landscape16x9,
            seed: Some(3),
            ..GenerationPreferences::default()
        };
        let context = build_context_for_request(
            &[],
            &compose_request("Generate a picture of a red apple", &prefs, None),
        );
        let memory = StepMemory::new();

        let answer = ScriptedRuntime::new().run(&context, &tools, &ctx, &memory)?;

        assert!(answer.starts_with("Generated 1 image(s): "), "{answer}");
        let (_, sent) = backend.last_job().unwrap_or_default();
        assert_eq!(sent["prompt"], json!("Generate a picture of a red apple"));
        assert_eq!(sent["image_size"], json!("landscape_16_9"));
        assert_eq!(sent["seed"], json!(3));
        let steps = memory.snapshot();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].tool.as_deref(), Some("fal_image_generation"));
        Ok(())
    }

    #[test]
    fn tool_failure_is_explained_not_raised() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let tools = ToolSet::standard(
            Arc::new(FakeBackend::failing("request timed out")),
            Arc::new(ModelSelector::default()),
        );
        let ctx = ToolContext::new(PerformanceMode::Fast, temp.path());
        let memory = StepMemory::new();

        let answer = ScriptedRuntime::new().run(
            "Current request: a video of a comet",
            &tools,
            &ctx,
            &memory,
        )?;
        assert!(answer.contains("Error generating video: request timed out"), "{answer}");
        assert_eq!(memory.len(), 2);
        Ok(())
    }

    #[test]
    fn plain_chat_uses_no_tool() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let tools = ToolSet::new();
        let ctx = ToolContext::new(PerformanceMode::Fast, temp.path());
        let memory = StepMemory::new();
        let answer = ScriptedRuntime::new().run("Current request: thanks!", &tools, &ctx, &memory)?;
        assert_eq!(answer, CHAT_REPLY);
        assert!(memory.snapshot().iter().all(|step| step.tool.is_none()));
        Ok(())
    }
}
