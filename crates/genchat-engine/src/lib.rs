pub mod agent;
pub mod backend;
pub mod error;
pub mod render;
pub mod session;
pub mod settings;
pub mod tools;

use std::sync::Arc;

use anyhow::Result;
use genchat_contracts::events::EventWriter;
use genchat_contracts::models::ModelSelector;
use genchat_contracts::request::GenerationPreferences;

use crate::agent::{AgentRunner, AgentRuntime, LlmRuntime, RuntimeKind, ScriptedRuntime};
use crate::backend::{build_backend, BackendKind, MediaBackend};
use crate::settings::Settings;
use crate::tools::ToolSet;

pub use crate::error::{AgentError, AgentResult};
pub use crate::session::{ChatSession, TurnEvent, TurnOutcome, TurnStream};

/// Wires backend, tools, runtime and runner into a ready chat session.
pub fn build_session(
    settings: &Settings,
    backend: BackendKind,
    runtime: RuntimeKind,
    events: Option<EventWriter>,
) -> Result<ChatSession> {
    let backend = build_backend(backend, settings)?;
    let runner = build_runner(settings, backend, runtime);
    ChatSession::new(
        runner,
        GenerationPreferences::with_mode(settings.mode),
        settings.media_dir.clone(),
        events,
    )
}

pub fn build_runner(
    settings: &Settings,
    backend: Arc<dyn MediaBackend>,
    runtime: RuntimeKind,
) -> AgentRunner {
    let tools = Arc::new(ToolSet::standard(
        backend.clone(),
        Arc::new(ModelSelector::default()),
    ));
    let runtime: Arc<dyn AgentRuntime> = match runtime {
        RuntimeKind::Llm => Arc::new(LlmRuntime::new(
            backend,
            settings.llm_endpoint.clone(),
            settings.llm_model.clone(),
            settings.max_agent_steps,
        )),
        RuntimeKind::Scripted => Arc::new(ScriptedRuntime::new()),
    };
    AgentRunner::new(runtime, tools, settings.poll_interval)
}
