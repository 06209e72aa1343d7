use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::kind::MediaKind;
use crate::chat::MediaRef;

/// Finds media references of one kind in free text, in first-seen order and
/// without duplicates.
///
/// A candidate is an `http(s)://` URL or an absolute local path whose
/// non-whitespace run ends in one of the kind's extensions. Local candidates
/// are only accepted when they name an existing file; remote candidates are
/// accepted as-is. Never fails: filesystem errors exclude the candidate.
pub fn extract_media_references(text: &str, kind: MediaKind) -> Vec<String> {
    let pattern = match kind {
        MediaKind::Image => image_pattern(),
        MediaKind::Video => video_pattern(),
    };
    scan(text, pattern)
}

/// Like [`extract_media_references`] across every media kind, classified.
pub fn extract_all_media(text: &str) -> Vec<MediaRef> {
    scan(text, any_media_pattern())
        .into_iter()
        .map(MediaRef::new)
        .collect()
}

pub fn is_remote_reference(candidate: &str) -> bool {
    let lowered = candidate.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// URL-shaped substrings, validated or not.
pub fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s"'<>)\]]+"#).expect("url pattern compiles")
    })
}

fn scan(text: &str, pattern: &Regex) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for found in pattern.find_iter(text) {
        let candidate = found.as_str();
        if out.iter().any(|existing| existing == candidate) {
            continue;
        }
        if !is_remote_reference(candidate) && !local_file_exists(candidate) {
            continue;
        }
        out.push(candidate.to_string());
    }
    out
}

fn local_file_exists(candidate: &str) -> bool {
    std::fs::metadata(Path::new(candidate))
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn build_pattern(extensions: &[&str]) -> Regex {
    let alternation = extensions.join("|");
    let source = format!(
        r#"(?i)https?://[^\s"'<>]+\.(?:{alternation})\b(?:\?[^\s"'<>)\],]*)?|/[^\s"'<>]*\.(?:{alternation})\b"#
    );
    Regex::new(&source).expect("media reference pattern compiles")
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| build_pattern(MediaKind::Image.extensions()))
}

fn video_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| build_pattern(MediaKind::Video.extensions()))
}

fn any_media_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let all: Vec<&str> = MediaKind::ALL
            .into_iter()
            .flat_map(|kind| kind.extensions().iter().copied())
            .collect();
        build_pattern(&all)
    })
}
