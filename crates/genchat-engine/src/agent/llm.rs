use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{invoke_tool, AgentRuntime, StepMemory};
use crate::backend::{truncate_text, MediaBackend};
use crate::error::{AgentError, AgentResult};
use crate::tools::{ToolContext, ToolSet};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u64 = 2048;

/// Tool-calling loop over a hosted chat model. The model answers each turn
/// with a single JSON object: either a tool call or a final answer.
pub struct LlmRuntime {
    backend: Arc<dyn MediaBackend>,
    endpoint: String,
    model: String,
    max_steps: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Tool {
        name: String,
        arguments: Map<String, Value>,
    },
    Final(String),
}

impl LlmRuntime {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
            model: model.into(),
            max_steps: max_steps.max(1),
        }
    }

    fn system_prompt(tools: &ToolSet) -> String {
        let catalog = serde_json::to_string_pretty(&tools.describe()).unwrap_or_default();
        format!(
            "You are a creative assistant that makes images and videos with these tools:\n\
{catalog}\n\n\
Reply with exactly one JSON object and nothing else.\n\
To call a tool: {{\"tool\": \"<name>\", \"arguments\": {{...}}}}\n\
To answer the user: {{\"final_answer\": \"<text>\"}}\n\n\
Honor every line under [User Technical Constraints] when calling a tool. \
When a tool reports saved files, repeat their exact paths in the final answer. \
If a tool reports an error, explain it briefly instead of retrying forever."
        )
    }

    fn complete(&self, system_prompt: &str, transcript: &str) -> AgentResult<String> {
        let arguments = json!({
            "model": self.model,
            "system_prompt": system_prompt,
            "prompt": transcript,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });
        let result = self.backend.run_job(&self.endpoint, &arguments)?;
        let output = result
            .get("output")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if output.is_empty() {
            return Err(AgentError::Runtime(format!(
                "{} returned an empty reply",
                self.endpoint
            )));
        }
        Ok(output.to_string())
    }
}

fn strip_code_fence(text: &str) -> &str {
    let raw = text.trim();
    let Some(inner) = raw.strip_prefix("```").and_then(|rest| rest.strip_suffix("```")) else {
        return raw;
    };
    let inner = inner.trim_start();
    inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .unwrap_or(inner)
        .trim()
}

fn json_object(text: &str) -> Option<Map<String, Value>> {
    let raw = strip_code_fence(text);
    let mut candidates = vec![raw];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(&raw[start..=end]);
        }
    }
    candidates.into_iter().find_map(|candidate| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .and_then(|parsed| parsed.as_object().cloned())
    })
}

/// Plain text without any JSON object is taken as the final answer.
fn parse_reply(text: &str) -> AgentResult<Reply> {
    let Some(object) = json_object(text) else {
        return Ok(Reply::Final(text.trim().to_string()));
    };
    if let Some(answer) = object.get("final_answer") {
        let answer = match answer {
            Value::String(text) => text.trim().to_string(),
            other => other.to_string(),
        };
        return Ok(Reply::Final(answer));
    }
    let Some(name) = object.get("tool").and_then(Value::as_str) else {
        return Err(AgentError::MalformedToolCall(truncate_text(text, 200)));
    };
    let arguments = match object.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(arguments)) => arguments.clone(),
        Some(_) => {
            return Err(AgentError::MalformedToolCall(format!(
                "arguments for '{name}' must be an object"
            )))
        }
    };
    Ok(Reply::Tool {
        name: name.trim().to_string(),
        arguments,
    })
}

impl AgentRuntime for LlmRuntime {
    fn name(&self) -> &str {
        "llm"
    }

    fn run(
        &self,
        context: &str,
        tools: &ToolSet,
        ctx: &ToolContext,
        memory: &StepMemory,
    ) -> AgentResult<String> {
        let system_prompt = Self::system_prompt(tools);
        let mut transcript = format!("User: {context}");

        for step in 1..=self.max_steps {
            let raw = self.complete(&system_prompt, &transcript)?;
            debug!(step, reply = %truncate_text(&raw, 200), "model reply");
            match parse_reply(&raw)? {
                Reply::Final(answer) => {
                    info!(steps = step, "agent finished");
                    memory.push(None, Some(&answer));
                    return Ok(answer);
                }
                Reply::Tool { name, arguments } => {
                    let observation = invoke_tool(tools, &name, &arguments, ctx, memory)?;
                    transcript.push_str(&format!(
                        "\n\nAssistant: {raw}\n\nObservation: {observation}"
                    ));
                }
            }
        }
        Err(AgentError::StepLimit(self.max_steps))
    }
}
