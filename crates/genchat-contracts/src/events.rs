use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Session event log: one compact JSON object per line, appended in emit
/// order. Every event carries `type`, `session_id` and `ts` unless the
/// payload overrides them.
///
/// The file is opened on the first emit and kept open; clones share the
/// handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    session_id: Arc<str>,
    file: Arc<Mutex<Option<File>>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        let session_id: String = session_id.into();
        Self {
            path: Arc::new(path.into()),
            session_id: Arc::from(session_id),
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_session_id())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn event(&self, event_type: &str, payload: EventPayload) -> EventPayload {
        let mut event = EventPayload::new();
        event.insert("type".into(), Value::from(event_type));
        event.insert("session_id".into(), Value::from(self.session_id()));
        event.insert("ts".into(), Value::from(now_utc_iso()));
        event.extend(payload);
        event
    }

    fn open(&self) -> Result<File> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .with_context(|| format!("failed to open {}", self.path.display()))
    }

    /// Appends one event and returns it as written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        let event = Value::Object(self.event(event_type, payload));
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = match slot.take() {
            Some(file) => file,
            None => self.open()?,
        };
        let file = slot.insert(file);
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(event)
    }

    pub fn emit_fields<I, K>(&self, event_type: &str, fields: I) -> Result<Value>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.emit(
            event_type,
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }
}

/// Reads an event log back. Blank lines are skipped; a malformed line is
/// an error naming its line number.
pub fn read_events(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} is not a JSON event", path.display(), idx + 1))?;
        events.push(event);
    }
    Ok(events)
}

pub fn new_session_id() -> String {
    format!("chat-{}", uuid::Uuid::new_v4().simple())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
