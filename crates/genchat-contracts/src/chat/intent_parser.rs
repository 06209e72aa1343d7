use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, MODE_SHORTCUTS, NO_ARG_COMMANDS, PATH_COMMANDS, SETTING_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings_update.get(key).and_then(Value::as_str)
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

/// Classifies one line of chat input: a slash command adjusting session
/// settings, or a chat message for the agent.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, SETTING_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .settings_update
                    .insert(spec.setting.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if MODE_SHORTCUTS.iter().any(|value| *value == command) {
                let mut intent = Intent::new("set_mode", text);
                intent
                    .settings_update
                    .insert("mode".to_string(), Value::String(command));
                return intent;
            }

            if let Some(spec) = find_spec(&command, PATH_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent.command_args.insert(
                    spec.setting.to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("chat", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_a_chat_message() {
        let intent = parse_intent("  Generate a picture of a red apple ");
        assert_eq!(intent.action, "chat");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("Generate a picture of a red apple")
        );
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn setting_commands_carry_their_argument() {
        let mode = parse_intent("/mode pro");
        assert_eq!(mode.action, "set_mode");
        assert_eq!(mode.setting("mode"), Some("pro"));

        let aspect = parse_intent("/aspect  landscape_16_9 ");
        assert_eq!(aspect.action, "set_aspect_ratio");
        assert_eq!(aspect.setting("aspect_ratio"), Some("landscape_16_9"));

        let negative = parse_intent("/negative blurry, low contrast");
        assert_eq!(negative.action, "set_negative_prompt");
        assert_eq!(
            negative.settings_update["negative_prompt"],
            json!("blurry, low contrast")
        );
    }

    #[test]
    fn mode_shortcuts() {
        let fast = parse_intent("/FAST");
        assert_eq!(fast.action, "set_mode");
        assert_eq!(fast.setting("mode"), Some("fast"));
        assert_eq!(parse_intent("/pro").setting("mode"), Some("pro"));
    }

    #[test]
    fn upload_accepts_quoted_paths() {
        let intent = parse_intent("/upload \"/tmp/my photo.png\"");
        assert_eq!(intent.action, "attach_upload");
        assert_eq!(intent.command_args["path"], json!("/tmp/my photo.png"));

        let bare = parse_intent("/upload /tmp/a.png");
        assert_eq!(bare.command_args["path"], json!("/tmp/a.png"));
    }

    #[test]
    fn no_arg_commands() {
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/history").action, "history");
        assert_eq!(parse_intent("/detach").action, "clear_upload");
    }

    #[test]
    fn unknown_command_keeps_name_and_arg() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn lone_slash_is_chat_text() {
        let intent = parse_intent("/ what is this");
        assert_eq!(intent.action, "chat");
    }
}
