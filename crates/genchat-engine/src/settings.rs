use std::env;
use std::path::PathBuf;
use std::time::Duration;

use genchat_contracts::models::PerformanceMode;
use tracing::warn;

pub const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";
pub const DEFAULT_STORAGE_BASE: &str = "https://rest.alpha.fal.ai";
pub const DEFAULT_LLM_ENDPOINT: &str = "fal-ai/any-llm";
pub const DEFAULT_LLM_MODEL: &str = "google/gemini-2.5-flash";

/// Process configuration read once at startup. Everything downstream gets
/// plain values out of this; nothing re-reads the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub fal_key: Option<String>,
    pub queue_base: String,
    pub storage_base: String,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub max_agent_steps: usize,
    pub mode: PerformanceMode,
    pub media_dir: PathBuf,
    pub poll_interval: Duration,
    pub api_poll_interval: Duration,
    pub api_timeout: Duration,
    pub inline_uploads: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                warn!(error = %err, "ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let int = |key: &str, default: u64, min: u64, max: u64| {
            get(key)
                .and_then(|raw| match raw.parse::<i64>() {
                    Ok(value) => Some(value.max(0) as u64),
                    Err(_) => {
                        warn!(key, value = %raw, "expected an integer; using default");
                        None
                    }
                })
                .unwrap_or(default)
                .clamp(min, max)
        };

        let mode = get("GENCHAT_MODE")
            .and_then(|raw| match raw.parse::<PerformanceMode>() {
                Ok(mode) => Some(mode),
                Err(message) => {
                    warn!("{message}");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            fal_key: get("FAL_KEY").or_else(|| get("FAL_API_KEY")),
            queue_base: base_url(get("FAL_QUEUE_BASE"), DEFAULT_QUEUE_BASE),
            storage_base: base_url(get("FAL_STORAGE_BASE"), DEFAULT_STORAGE_BASE),
            llm_endpoint: get("GENCHAT_LLM_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            llm_model: get("GENCHAT_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            max_agent_steps: int("GENCHAT_MAX_AGENT_STEPS", 10, 1, 25) as usize,
            mode,
            media_dir: get("GENCHAT_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("genchat")),
            poll_interval: Duration::from_millis(int("GENCHAT_POLL_INTERVAL_MS", 200, 100, 300)),
            api_poll_interval: Duration::from_millis(int(
                "GENCHAT_API_POLL_INTERVAL_MS",
                1000,
                200,
                5000,
            )),
            api_timeout: Duration::from_secs(int("GENCHAT_API_TIMEOUT_S", 300, 10, 1800)),
            inline_uploads: get("GENCHAT_INLINE_UPLOADS")
                .map(|raw| is_truthy(&raw))
                .unwrap_or(false),
        }
    }
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .map(|raw| raw.trim_end_matches('/').to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use genchat_contracts::models::PerformanceMode;

    use super::{Settings, DEFAULT_LLM_MODEL, DEFAULT_QUEUE_BASE};

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings_from(&[]);
        assert_eq!(settings.fal_key, None);
        assert_eq!(settings.queue_base, DEFAULT_QUEUE_BASE);
        assert_eq!(settings.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(settings.max_agent_steps, 10);
        assert_eq!(settings.mode, PerformanceMode::Fast);
        assert_eq!(settings.poll_interval, Duration::from_millis(200));
        assert_eq!(settings.api_timeout, Duration::from_secs(300));
        assert!(settings.media_dir.ends_with("genchat"));
        assert!(!settings.inline_uploads);
    }

    #[test]
    fn numeric_values_are_clamped() {
        let settings = settings_from(&[
            ("GENCHAT_MAX_AGENT_STEPS", "999"),
            ("GENCHAT_POLL_INTERVAL_MS", "5"),
            ("GENCHAT_API_POLL_INTERVAL_MS", "-40"),
            ("GENCHAT_API_TIMEOUT_S", "not-a-number"),
        ]);
        assert_eq!(settings.max_agent_steps, 25);
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.api_poll_interval, Duration::from_millis(200));
        assert_eq!(settings.api_timeout, Duration::from_secs(300));
    }

    #[test]
    fn key_alias_mode_and_bases_are_read() {
        let settings = settings_from(&[
            ("FAL_API_KEY", " secret "),
            ("GENCHAT_MODE", "pro"),
            ("FAL_QUEUE_BASE", "http://127.0.0.1:9000/"),
            ("GENCHAT_INLINE_UPLOADS", "yes"),
        ]);
        assert_eq!(settings.fal_key.as_deref(), Some("secret"));
        assert_eq!(settings.mode, PerformanceMode::Pro);
        assert_eq!(settings.queue_base, "http://127.0.0.1:9000");
        assert!(settings.inline_uploads);

        let primary = settings_from(&[("FAL_KEY", "a"), ("FAL_API_KEY", "b")]);
        assert_eq!(primary.fal_key.as_deref(), Some("a"));
    }

    #[test]
    fn invalid_mode_falls_back_to_fast() {
        assert_eq!(settings_from(&[("GENCHAT_MODE", "ultra")]).mode, PerformanceMode::Fast);
    }
}
