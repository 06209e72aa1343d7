use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::{mime_for_path, MediaKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Capitalized label used when flattening history into prompt text.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }

    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" | "bot" | "model" | "ai" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// A local file path or remote URL plus a MIME hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: String,
    #[serde(default)]
    pub mime_type: String,
}

impl MediaRef {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let mime_type = mime_for_path(&path).to_string();
        Self { path, mime_type }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        if self.mime_type.starts_with("image/") {
            return Some(MediaKind::Image);
        }
        if self.mime_type.starts_with("video/") {
            return Some(MediaKind::Video);
        }
        MediaKind::from_path(&self.path)
    }
}

/// Either plain text or exactly one media reference. Multi-part messages are
/// stored as several consecutive turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Media(MediaRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: ChatContent,
}

impl ChatTurn {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: ChatContent::Text(text.into()),
        }
    }

    pub fn media(role: ChatRole, media: MediaRef) -> Self {
        Self {
            role,
            content: ChatContent::Media(media),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, text)
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            ChatContent::Text(text) => Some(text.as_str()),
            ChatContent::Media(_) => None,
        }
    }

    pub fn as_media(&self) -> Option<&MediaRef> {
        match &self.content {
            ChatContent::Media(media) => Some(media),
            ChatContent::Text(_) => None,
        }
    }
}

/// Reads chat history in the web chat message format: a list of
/// `{role, content}` objects where content is a string, a `{path, mime_type}`
/// object, or a list of such parts. List content becomes one turn per part;
/// missing fields become empty strings.
pub fn turns_from_json(value: &Value) -> Vec<ChatTurn> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };
    let mut turns = Vec::new();
    for row in rows {
        let role = row
            .get("role")
            .and_then(Value::as_str)
            .map(ChatRole::parse_lenient)
            .unwrap_or(ChatRole::User);
        match row.get("content") {
            Some(Value::Array(parts)) => {
                for part in parts {
                    turns.push(ChatTurn {
                        role,
                        content: content_from_value(part),
                    });
                }
            }
            Some(content) => turns.push(ChatTurn {
                role,
                content: content_from_value(content),
            }),
            None => turns.push(ChatTurn::text(role, "")),
        }
    }
    turns
}

pub fn turns_to_json(turns: &[ChatTurn]) -> Value {
    serde_json::to_value(turns).unwrap_or_else(|_| Value::Array(Vec::new()))
}

fn content_from_value(value: &Value) -> ChatContent {
    match value {
        Value::String(text) => ChatContent::Text(text.clone()),
        Value::Null => ChatContent::Text(String::new()),
        Value::Bool(_) | Value::Number(_) => ChatContent::Text(value.to_string()),
        Value::Array(_) => ChatContent::Text(String::new()),
        Value::Object(obj) => {
            let path = obj
                .get("path")
                .and_then(Value::as_str)
                .or_else(|| {
                    obj.get("file")
                        .and_then(|file| file.get("path"))
                        .and_then(Value::as_str)
                })
                .map(str::trim)
                .filter(|path| !path.is_empty());
            if let Some(path) = path {
                let mime_type = obj
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|mime| !mime.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| mime_for_path(path).to_string());
                return ChatContent::Media(MediaRef {
                    path: path.to_string(),
                    mime_type,
                });
            }
            let text = obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ChatContent::Text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{turns_from_json, turns_to_json, ChatContent, ChatRole, ChatTurn, MediaRef};
    use crate::media::MediaKind;

    #[test]
    fn multi_part_content_splits_into_single_purpose_turns() {
        let history = json!([
            {"role": "user", "content": "make it blue"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Here you go"},
                {"path": "/tmp/a.png", "mime_type": "image/png"},
                {"path": "/tmp/b.mp4"}
            ]}
        ]);
        let turns = turns_from_json(&history);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].as_text(), Some("Here you go"));
        assert_eq!(turns[2].as_media().map(|m| m.path.as_str()), Some("/tmp/a.png"));
        assert_eq!(
            turns[3].as_media().map(|m| m.mime_type.as_str()),
            Some("video/mp4")
        );
        assert!(turns[1..].iter().all(|turn| turn.role == ChatRole::Assistant));
    }

    #[test]
    fn missing_fields_become_empty_text() {
        let turns = turns_from_json(&json!([{}, {"role": "assistant", "content": null}]));
        assert_eq!(turns, vec![ChatTurn::user(""), ChatTurn::assistant("")]);
        assert!(turns_from_json(&json!({"role": "user"})).is_empty());
    }

    #[test]
    fn gradio_file_objects_are_media() {
        let turns = turns_from_json(&json!([
            {"role": "user", "content": {"file": {"path": "/tmp/up.jpg"}}}
        ]));
        let media = turns[0].as_media().cloned().unwrap_or_else(|| MediaRef::new(""));
        assert_eq!(media.path, "/tmp/up.jpg");
        assert_eq!(media.kind(), Some(MediaKind::Image));
    }

    #[test]
    fn serialized_history_reads_back() {
        let turns = vec![
            ChatTurn::user("hello"),
            ChatTurn::media(ChatRole::Assistant, MediaRef::new("/tmp/x.webm")),
        ];
        let value = turns_to_json(&turns);
        assert_eq!(value[1]["content"]["path"], json!("/tmp/x.webm"));
        assert_eq!(turns_from_json(&value), turns);
        assert!(matches!(turns[0].content, ChatContent::Text(_)));
    }
}
