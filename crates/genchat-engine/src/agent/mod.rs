mod llm;
mod runner;
mod scripted;

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::bail;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::backend::truncate_text;
use crate::error::{AgentError, AgentResult};
use crate::tools::{ToolContext, ToolRequest, ToolSet};

pub use llm::LlmRuntime;
pub use runner::{AgentRun, AgentRunner, ProgressSnapshot, RunEvent, RunOutcome, SPINNER_FRAMES};
pub use scripted::ScriptedRuntime;

/// One completed step of an agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStep {
    /// 1-based, in completion order.
    pub index: usize,
    pub tool: Option<String>,
    pub observation: Option<String>,
}

/// Append-only step log shared between a run's worker and its poller.
/// Published steps are never modified.
#[derive(Debug, Clone, Default)]
pub struct StepMemory {
    steps: Arc<RwLock<Vec<AgentStep>>>,
}

impl StepMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tool: Option<&str>, observation: Option<&str>) -> usize {
        let mut steps = self.steps.write().unwrap_or_else(PoisonError::into_inner);
        let index = steps.len() + 1;
        steps.push(AgentStep {
            index,
            tool: tool.map(str::to_string),
            observation: observation.map(str::to_string),
        });
        index
    }

    pub fn len(&self) -> usize {
        self.steps.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<AgentStep> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<AgentStep> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Observations of the steps that called a tool, in order.
pub fn tool_outputs(steps: &[AgentStep]) -> Vec<String> {
    steps
        .iter()
        .filter(|step| step.tool.is_some())
        .filter_map(|step| step.observation.clone())
        .collect()
}

/// The reasoning loop behind one agent run. Runs on the runner's worker
/// thread; every completed step must be appended to `memory`.
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        context: &str,
        tools: &ToolSet,
        ctx: &ToolContext,
        memory: &StepMemory,
    ) -> AgentResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Llm,
    Scripted,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Scripted => "scripted",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "scripted" | "offline" => Ok(Self::Scripted),
            other => bail!("unknown agent runtime '{other}' (expected 'llm' or 'scripted')"),
        }
    }
}

/// Runs one named tool and records the step. Unknown names abort the run.
pub fn invoke_tool(
    tools: &ToolSet,
    name: &str,
    arguments: &Map<String, Value>,
    ctx: &ToolContext,
    memory: &StepMemory,
) -> AgentResult<String> {
    let Some(tool) = tools.get(name) else {
        return Err(AgentError::UnknownTool(name.to_string()));
    };
    let request = ToolRequest::from_arguments(arguments);
    info!(tool = name, prompt = %truncate_text(&request.prompt, 80), "invoking tool");
    let observation = tool.invoke(&request, ctx);
    memory.push(Some(name), Some(&observation));
    Ok(observation)
}
