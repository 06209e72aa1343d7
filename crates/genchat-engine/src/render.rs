use std::sync::OnceLock;

use genchat_contracts::chat::{ChatRole, ChatTurn, MediaRef};
use genchat_contracts::media::{extract_all_media, url_pattern};
use regex::Regex;

use crate::error::AgentError;

fn status_boilerplate() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:Generated \d+ (?:image|video)\(s\):|Edited image saved to:)")
            .expect("status pattern compiles")
    })
}

/// Media named by the tool statuses when any of them names one, otherwise
/// media named by the agent's own answer.
fn collect_media(agent_output: &str, tool_outputs: &[String]) -> Vec<MediaRef> {
    let mut media: Vec<MediaRef> = Vec::new();
    for output in tool_outputs {
        for found in extract_all_media(output) {
            if !media.iter().any(|existing| existing.path == found.path) {
                media.push(found);
            }
        }
    }
    if media.is_empty() {
        media = extract_all_media(agent_output);
    }
    media
}

fn clean_text(agent_output: &str, media: &[MediaRef]) -> String {
    let mut text = agent_output.to_string();
    for item in media {
        text = text.replace(&item.path, "");
    }
    for found in extract_all_media(agent_output) {
        text = text.replace(&found.path, "");
    }
    let text = url_pattern().replace_all(&text, "");
    let text = status_boilerplate().replace_all(&text, "");
    text.lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':')))
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Turns one finished agent run into assistant chat turns: at most one text
/// turn, then one media turn per reference in first-seen order.
pub fn render_response(agent_output: &str, tool_outputs: &[String]) -> Vec<ChatTurn> {
    let media = collect_media(agent_output, tool_outputs);
    let text = clean_text(agent_output, &media);

    let mut turns = Vec::with_capacity(media.len() + 1);
    if !text.is_empty() {
        turns.push(ChatTurn::assistant(text));
    }
    turns.extend(
        media
            .into_iter()
            .map(|item| ChatTurn::media(ChatRole::Assistant, item)),
    );
    turns
}

/// The single assistant turn shown when a run aborts.
pub fn render_failure(err: &AgentError) -> ChatTurn {
    ChatTurn::assistant(format!(
        "❌ Error: {err}\n\nPlease try rephrasing your request."
    ))
}
