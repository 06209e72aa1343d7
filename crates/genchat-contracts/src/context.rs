use crate::chat::{ChatContent, ChatTurn};

pub const HISTORY_HEADER: &str = "Previous conversation:";
pub const CURRENT_REQUEST_PREFIX: &str = "Current request:";

/// Flattens a chat history into the agent's context string. The last turn is
/// the pending request; every earlier turn is prior conversation.
pub fn build_context(history: &[ChatTurn]) -> String {
    match history.split_last() {
        Some((current, prior)) => {
            let request = current.as_text().unwrap_or_default();
            build_context_for_request(prior, request)
        }
        None => build_context_for_request(&[], ""),
    }
}

/// Renders prior text turns as `Role: text` lines under a header and appends
/// the current request. Media turns and blank text turns are skipped. Pure:
/// the same input always yields the same string.
pub fn build_context_for_request(prior: &[ChatTurn], request: &str) -> String {
    let lines = prior
        .iter()
        .filter_map(|turn| match &turn.content {
            ChatContent::Text(text) if !text.trim().is_empty() => {
                Some(format!("{}: {}", turn.role.label(), text.trim()))
            }
            _ => None,
        })
        .collect::<Vec<String>>();

    let mut out = String::new();
    if !lines.is_empty() {
        out.push_str(HISTORY_HEADER);
        out.push('\n');
        out.push_str(&lines.join("\n"));
        out.push_str("\n\n");
    }
    out.push_str(CURRENT_REQUEST_PREFIX);
    out.push(' ');
    out.push_str(request.trim());
    out
}

/// The text after the last `Current request:` marker, or the whole context
/// when it has none.
pub fn current_request(context: &str) -> &str {
    match context.rfind(CURRENT_REQUEST_PREFIX) {
        Some(idx) => context[idx + CURRENT_REQUEST_PREFIX.len()..].trim(),
        None => context.trim(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_context, build_context_for_request, current_request};
    use crate::chat::{turns_from_json, ChatRole, ChatTurn, MediaRef};

    #[test]
    fn single_turn_has_no_history_header() {
        let context = build_context(&[ChatTurn::user("Generate a picture of a red apple")]);
        assert_eq!(context, "Current request: Generate a picture of a red apple");
    }

    #[test]
    fn media_turns_are_omitted_entirely() {
        let history = vec![
            ChatTurn::user("draw a fox"),
            ChatTurn::media(ChatRole::Assistant, MediaRef::new("/tmp/fox.png")),
            ChatTurn::media(ChatRole::User, MediaRef::new("https://cdn.invalid/ref.jpg")),
            ChatTurn::assistant("Here is your fox."),
            ChatTurn::user("now make it blue"),
        ];
        let context = build_context(&history);
        assert_eq!(
            context,
            "Previous conversation:\nUser: draw a fox\nAssistant: Here is your fox.\n\nCurrent request: now make it blue"
        );
        assert!(!context.contains("fox.png"));
        assert!(!context.contains("ref.jpg"));
    }

    #[test]
    fn output_is_deterministic() {
        let history = turns_from_json(&json!([
            {"role": "user", "content": "a"},
            {"role": "assistant", "content": [{"text": "b"}, {"path": "/tmp/b.png"}]},
            {"role": "user", "content": "c"}
        ]));
        let first = build_context(&history);
        let second = build_context(&history.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn tolerates_missing_fields_and_empty_history() {
        let history = turns_from_json(&json!([{}, {"role": "assistant"}, {"content": "go"}]));
        assert_eq!(build_context(&history), "Current request: go");
        assert_eq!(build_context(&[]), "Current request: ");
        let media_last = vec![ChatTurn::media(ChatRole::User, MediaRef::new("/tmp/a.png"))];
        assert_eq!(build_context(&media_last), "Current request: ");
    }

    #[test]
    fn current_request_extracts_the_tail() {
        let context = build_context_for_request(&[ChatTurn::user("x")], "make a video");
        assert_eq!(current_request(&context), "make a video");
        assert_eq!(current_request("  plain  "), "plain");
    }
}
