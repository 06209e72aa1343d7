use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use genchat_contracts::chat::{turns_from_json, ChatRole, ChatTurn, MediaRef};
use genchat_contracts::context::build_context_for_request;
use genchat_contracts::events::{EventPayload, EventWriter};
use genchat_contracts::request::{compose_request, GenerationPreferences};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{
    tool_outputs, AgentRun, AgentRunner, AgentStep, ProgressSnapshot, RunEvent, RunOutcome,
};
use crate::error::{AgentError, AgentResult};
use crate::render::{render_failure, render_response};
use crate::tools::ToolContext;

/// One chat conversation: history, generation preferences, the pending
/// upload and the runner that answers each user turn.
pub struct ChatSession {
    runner: AgentRunner,
    history: Vec<ChatTurn>,
    prefs: GenerationPreferences,
    upload: Option<String>,
    media_dir: PathBuf,
    events: Option<EventWriter>,
    turns_sent: usize,
}

#[derive(Debug)]
pub struct TurnOutcome {
    /// Assistant turns appended to the history, in order.
    pub turns: Vec<ChatTurn>,
    pub steps: Vec<AgentStep>,
    pub elapsed: Duration,
    pub error: Option<AgentError>,
}

#[derive(Debug)]
pub enum TurnEvent {
    Progress(ProgressSnapshot),
    Finished(TurnOutcome),
}

fn json_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

impl ChatSession {
    pub fn new(
        runner: AgentRunner,
        prefs: GenerationPreferences,
        media_dir: impl Into<PathBuf>,
        events: Option<EventWriter>,
    ) -> Result<Self> {
        let media_dir = media_dir.into();
        if let Some(events) = events.as_ref() {
            events.emit(
                "session_started",
                json_object(json!({
                    "runtime": runner.runtime_name(),
                    "mode": prefs.mode.as_str(),
                    "media_dir": media_dir.to_string_lossy(),
                })),
            )?;
        }
        Ok(Self {
            runner,
            history: Vec::new(),
            prefs,
            upload: None,
            media_dir,
            events,
            turns_sent: 0,
        })
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn preferences(&self) -> &GenerationPreferences {
        &self.prefs
    }

    pub fn upload(&self) -> Option<&str> {
        self.upload.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.runner.is_busy()
    }

    pub fn event_writer(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    /// Applies one `/command` setting. The previous preferences stay in
    /// place when the value is rejected.
    pub fn apply_setting(&mut self, setting: &str, raw: &str) -> Result<&GenerationPreferences> {
        self.prefs = self.prefs.updated(setting, raw)?;
        info!(setting, value = raw, "preferences updated");
        self.emit(
            "settings_changed",
            json!({
                "setting": setting,
                "value": raw,
                "preferences": self.prefs.describe(),
            }),
        );
        Ok(&self.prefs)
    }

    /// Attaches a local file to the next user turn.
    pub fn attach_upload(&mut self, path: impl AsRef<Path>) -> Result<&str> {
        let path = path.as_ref();
        let resolved = std::fs::canonicalize(path)
            .with_context(|| format!("upload not found: {}", path.display()))?;
        if !resolved.is_file() {
            bail!("upload is not a file: {}", resolved.display());
        }
        let resolved = resolved.to_string_lossy().to_string();
        Ok(self.upload.insert(resolved).as_str())
    }

    pub fn clear_upload(&mut self) -> Option<String> {
        self.upload.take()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.upload = None;
    }

    /// Replaces the history with turns imported from the UI's JSON message
    /// list. Returns the number of turns loaded.
    pub fn load_history(&mut self, messages: &Value) -> usize {
        self.history = turns_from_json(messages);
        self.history.len()
    }

    /// Starts the agent on `text`. The user turn (and the attached upload)
    /// joins the history once the run has started; assistant turns are added
    /// when the returned stream finishes.
    pub fn send(&mut self, text: &str) -> AgentResult<TurnStream<'_>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::Runtime("nothing to send".to_string()));
        }
        let request = compose_request(text, &self.prefs, self.upload.as_deref());
        let context = build_context_for_request(&self.history, &request);
        let ctx = ToolContext::new(self.prefs.mode, self.media_dir.clone());
        let run = self.runner.run(context, ctx)?;

        self.turns_sent += 1;
        let turn = self.turns_sent;
        self.history.push(ChatTurn::user(text));
        let upload = self.upload.take();
        if let Some(path) = upload.as_deref() {
            self.history
                .push(ChatTurn::media(ChatRole::User, MediaRef::new(path)));
        }
        self.emit(
            "turn_started",
            json!({
                "turn": turn,
                "text": text,
                "upload": upload,
                "preferences": self.prefs.describe(),
            }),
        );

        Ok(TurnStream {
            session: self,
            run: Some(run),
            turn,
        })
    }

    /// Like [`ChatSession::send`], skipping progress updates.
    pub fn send_and_wait(&mut self, text: &str) -> AgentResult<TurnOutcome> {
        let mut stream = self.send(text)?;
        let mut outcome = None;
        for event in stream.by_ref() {
            if let TurnEvent::Finished(finished) = event {
                outcome = Some(finished);
            }
        }
        outcome.ok_or_else(|| AgentError::Runtime("turn ended without an outcome".to_string()))
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, json_object(payload)) {
            warn!(event = event_type, error = %err, "failed to write session event");
        }
    }

    fn complete_turn(&mut self, turn: usize, outcome: RunOutcome) -> TurnOutcome {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        for step in outcome.steps.iter().filter(|step| step.tool.is_some()) {
            self.emit(
                "tool_invoked",
                json!({
                    "turn": turn,
                    "index": step.index,
                    "tool": step.tool,
                    "observation": step.observation,
                }),
            );
        }

        let (turns, error) = match outcome.result {
            Ok(answer) => {
                let turns = render_response(&answer, &tool_outputs(&outcome.steps));
                let media = turns
                    .iter()
                    .filter_map(|turn| turn.as_media().map(|media| media.path.clone()))
                    .collect::<Vec<String>>();
                self.emit(
                    "turn_finished",
                    json!({
                        "turn": turn,
                        "steps": outcome.steps.len(),
                        "elapsed_ms": elapsed_ms,
                        "media": media,
                    }),
                );
                (turns, None)
            }
            Err(err) => {
                self.emit(
                    "turn_failed",
                    json!({
                        "turn": turn,
                        "steps": outcome.steps.len(),
                        "elapsed_ms": elapsed_ms,
                        "error": err.to_string(),
                    }),
                );
                (vec![render_failure(&err)], Some(err))
            }
        };
        self.history.extend(turns.iter().cloned());
        TurnOutcome {
            turns,
            steps: outcome.steps,
            elapsed: outcome.elapsed,
            error,
        }
    }
}

/// Progress for one user turn, then its outcome. Dropping the stream before
/// it finishes leaves the worker running and the assistant turns unrecorded.
pub struct TurnStream<'a> {
    session: &'a mut ChatSession,
    run: Option<AgentRun>,
    turn: usize,
}

impl Iterator for TurnStream<'_> {
    type Item = TurnEvent;

    fn next(&mut self) -> Option<TurnEvent> {
        let mut run = self.run.take()?;
        match run.next()? {
            RunEvent::Progress(snapshot) => {
                self.run = Some(run);
                Some(TurnEvent::Progress(snapshot))
            }
            RunEvent::Finished(outcome) => Some(TurnEvent::Finished(
                self.session.complete_turn(self.turn, outcome),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use genchat_contracts::chat::ChatRole;
    use genchat_contracts::events::{read_events, EventWriter};
    use genchat_contracts::models::ModelSelector;
    use genchat_contracts::request::GenerationPreferences;
    use serde_json::json;

    use super::{ChatSession, TurnEvent};
    use crate::agent::{AgentRunner, AgentRuntime, ScriptedRuntime, StepMemory};
    use crate::backend::{DryrunBackend, MediaBackend};
    use crate::error::{AgentError, AgentResult};
    use crate::tools::{ToolContext, ToolSet};

    /// Remembers every context it was given and answers with plain text.
    #[derive(Default)]
    struct ContextProbe {
        contexts: Mutex<Vec<String>>,
    }

    impl AgentRuntime for ContextProbe {
        fn name(&self) -> &str {
            "probe"
        }

        fn run(
            &self,
            context: &str,
            _: &ToolSet,
            _: &ToolContext,
            memory: &StepMemory,
        ) -> AgentResult<String> {
            if let Ok(mut contexts) = self.contexts.lock() {
                contexts.push(context.to_string());
            }
            memory.push(None, Some("Sure, noted."));
            Ok("Sure, noted.".to_string())
        }
    }

    struct BrokenRuntime;

    impl AgentRuntime for BrokenRuntime {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(
            &self,
            _: &str,
            _: &ToolSet,
            _: &ToolContext,
            _: &StepMemory,
        ) -> AgentResult<String> {
            Err(AgentError::MalformedToolCall(
                "arguments for 'x' must be an object".to_string(),
            ))
        }
    }

    fn session_with(runtime: Arc<dyn AgentRuntime>, dir: &Path) -> anyhow::Result<ChatSession> {
        let backend: Arc<dyn MediaBackend> = Arc::new(DryrunBackend::new("fal-ai/any-llm"));
        let tools = Arc::new(ToolSet::standard(backend, Arc::new(ModelSelector::default())));
        let runner = AgentRunner::new(runtime, tools, Duration::from_millis(100));
        ChatSession::new(
            runner,
            GenerationPreferences::default(),
            dir.join("media"),
            Some(EventWriter::new(dir.join("events.jsonl"), "chat-test")),
        )
    }

    fn event_types(dir: &Path) -> anyhow::Result<Vec<String>> {
        Ok(read_events(&dir.join("events.jsonl"))?
            .iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect())
    }

    #[test]
    fn image_turn_renders_media_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with(Arc::new(ScriptedRuntime::new()), temp.path())?;

        let mut saw_progress = false;
        let mut finished = None;
        for event in session.send("Generate a picture of a red apple")? {
            match event {
                TurnEvent::Progress(_) => saw_progress = true,
                TurnEvent::Finished(outcome) => finished = Some(outcome),
            }
        }
        let Some(outcome) = finished else {
            anyhow::bail!("turn never finished");
        };

        assert!(saw_progress);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.turns.len(), 1);
        let Some(media) = outcome.turns[0].as_media() else {
            anyhow::bail!("expected a media turn, got {:?}", outcome.turns[0]);
        };
        assert_eq!(media.mime_type, "image/png");
        assert!(Path::new(&media.path).is_file());

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].as_text(), Some("Generate a picture of a red apple"));
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert!(!session.is_busy());
        assert_eq!(
            event_types(temp.path())?,
            vec!["session_started", "turn_started", "tool_invoked", "turn_finished"]
        );
        Ok(())
    }

    #[test]
    fn upload_is_sent_once_and_routed_to_edit() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("house.png");
        fs::write(&source, b"png")?;
        let mut session = session_with(Arc::new(ScriptedRuntime::new()), temp.path())?;

        session.attach_upload(&source)?;
        let outcome = session.send_and_wait("make it look like winter")?;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.steps[0].tool.as_deref(), Some("fal_image_edit"));
        assert!(session.upload().is_none());
        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, ChatRole::User);
        assert!(history[1].as_media().is_some());
        assert!(history[2].as_media().is_some());
        Ok(())
    }

    #[test]
    fn runtime_failure_becomes_one_error_turn() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with(Arc::new(BrokenRuntime), temp.path())?;

        let outcome = session.send_and_wait("draw a cat")?;

        assert!(matches!(outcome.error, Some(AgentError::MalformedToolCall(_))));
        assert_eq!(outcome.turns.len(), 1);
        let text = outcome.turns[0].as_text().unwrap_or_default();
        assert!(text.starts_with("❌ Error: malformed tool call"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(event_types(temp.path())?.last().map(String::as_str), Some("turn_failed"));
        Ok(())
    }

    #[test]
    fn later_turns_see_earlier_text_but_not_media() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let probe = Arc::new(ContextProbe::default());
        let mut session = session_with(probe.clone(), temp.path())?;
        session.load_history(&json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": {"path": "/tmp/old.png", "mime_type": "image/png"}}
        ]));

        session.send_and_wait("first")?;
        session.apply_setting("seed", "7")?;
        session.send_and_wait("second")?;

        let contexts = probe.contexts.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(contexts.len(), 2);
        assert!(contexts[0]
            .starts_with("Previous conversation:\nUser: hi\n\nCurrent request: first"));
        assert!(!contexts[0].contains("old.png"));
        assert!(contexts[1]
            .contains("User: first\nAssistant: Sure, noted.\n\nCurrent request: second"));
        assert!(contexts[1].contains("- Seed: 7"));
        Ok(())
    }

    #[test]
    fn settings_and_uploads_are_validated() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with(Arc::new(ContextProbe::default()), temp.path())?;

        assert!(session.apply_setting("inference_steps", "lots").is_err());
        assert_eq!(session.preferences(), &GenerationPreferences::default());
        assert_eq!(session.apply_setting("inference_steps", "500")?.inference_steps, 50);
        assert!(session.attach_upload(temp.path().join("nope.png")).is_err());
        assert!(session.upload().is_none());
        assert!(matches!(session.send("   "), Err(AgentError::Runtime(_))));

        session.send_and_wait("hello")?;
        session.reset();
        assert!(session.history().is_empty());
        Ok(())
    }
}
