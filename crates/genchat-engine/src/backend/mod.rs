mod dryrun;
mod fal;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::settings::Settings;

pub use dryrun::DryrunBackend;
pub use fal::FalBackend;

/// Bytes fetched from a result URL, passed through untouched.
#[derive(Debug, Clone)]
pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Job-style generative media API. Every call blocks until the job is done
/// or has failed.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Submits `arguments` to `endpoint` and waits for the result payload.
    fn run_job(&self, endpoint: &str, arguments: &Value) -> Result<Value>;

    /// Makes a local file reachable by the API and returns its URL.
    fn upload(&self, path: &Path) -> Result<String>;

    fn download(&self, url: &str) -> Result<MediaBytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Fal,
    Dryrun,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fal => "fal",
            Self::Dryrun => "dryrun",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fal" => Ok(Self::Fal),
            "dryrun" | "dry-run" | "offline" => Ok(Self::Dryrun),
            other => bail!("unknown media backend '{other}' (expected 'fal' or 'dryrun')"),
        }
    }
}

pub fn build_backend(kind: BackendKind, settings: &Settings) -> Result<Arc<dyn MediaBackend>> {
    Ok(match kind {
        BackendKind::Fal => Arc::new(FalBackend::new(settings)?),
        BackendKind::Dryrun => Arc::new(DryrunBackend::new(&settings.llm_endpoint)),
    })
}

/// Collects result URLs from a fal-style payload in document order.
pub fn extract_media_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if !trimmed.is_empty()
                && trimmed.starts_with("http")
                && !out.iter().any(|existing| existing == trimmed)
            {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_media_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "images", "image", "video", "videos", "output"] {
                if let Some(inner) = obj.get(key) {
                    extract_media_urls(inner, out);
                }
            }
        }
        _ => {}
    }
}

pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Flattens an error and its causes into one line, dropping repeats.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::{error_chain_text, extract_media_urls, truncate_text, BackendKind};

    #[test]
    fn extracts_image_and_video_urls_once() {
        let payload = json!({
            "images": [
                {"url": "https://cdn.invalid/a.png", "width": 720},
                {"url": "https://cdn.invalid/b.png"},
                {"url": "https://cdn.invalid/a.png"}
            ],
            "video": {"url": "https://cdn.invalid/c.mp4"},
            "seed": 4,
            "description": "not a url"
        });
        let mut urls = Vec::new();
        extract_media_urls(&payload, &mut urls);
        assert_eq!(
            urls,
            vec![
                "https://cdn.invalid/a.png",
                "https://cdn.invalid/b.png",
                "https://cdn.invalid/c.mp4"
            ]
        );
    }

    #[test]
    fn error_chain_joins_causes() {
        let err = anyhow!("read timed out")
            .context("fal status poll failed")
            .context("fal status poll failed");
        assert_eq!(
            error_chain_text(&err, 512),
            "fal status poll failed | caused by: read timed out"
        );
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }

    #[test]
    fn backend_kind_parses() -> anyhow::Result<()> {
        assert_eq!("DRYRUN".parse::<BackendKind>()?, BackendKind::Dryrun);
        assert_eq!("fal".parse::<BackendKind>()?, BackendKind::Fal);
        assert!("replicate".parse::<BackendKind>().is_err());
        Ok(())
    }
}
