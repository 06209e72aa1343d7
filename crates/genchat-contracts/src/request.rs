use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::models::PerformanceMode;

pub const CONSTRAINTS_HEADER: &str = "[User Technical Constraints]";
pub const UPLOAD_PREFIX: &str = "Uploaded file path:";

pub const DEFAULT_INFERENCE_STEPS: u32 = 4;
pub const MIN_INFERENCE_STEPS: u32 = 1;
pub const MAX_INFERENCE_STEPS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    #[default]
    Square,
    Landscape4x3,
    Landscape16x9,
    Portrait3x4,
    Portrait9x16,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape4x3,
        AspectRatio::Landscape16x9,
        AspectRatio::Portrait3x4,
        AspectRatio::Portrait9x16,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Landscape4x3 => "landscape_4_3",
            Self::Landscape16x9 => "landscape_16_9",
            Self::Portrait3x4 => "portrait_3_4",
            Self::Portrait9x16 => "portrait_9_16",
        }
    }

    /// fal `image_size` preset name. fal names portrait presets by their
    /// long-side-first ratio.
    pub fn image_size_preset(self) -> &'static str {
        match self {
            Self::Square => "square_hd",
            Self::Landscape4x3 => "landscape_4_3",
            Self::Landscape16x9 => "landscape_16_9",
            Self::Portrait3x4 => "portrait_4_3",
            Self::Portrait9x16 => "portrait_16_9",
        }
    }

    pub fn video_ratio(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape4x3 => "4:3",
            Self::Landscape16x9 => "16:9",
            Self::Portrait3x4 => "3:4",
            Self::Portrait9x16 => "9:16",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    /// Accepts preset names and `w:h` ratios.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let parsed = match normalized.as_str() {
            "square" | "square_hd" | "1:1" => Self::Square,
            "landscape_4_3" | "4:3" => Self::Landscape4x3,
            "landscape_16_9" | "16:9" => Self::Landscape16x9,
            "portrait_3_4" | "portrait_4_3" | "3:4" => Self::Portrait3x4,
            "portrait_9_16" | "portrait_16_9" | "9:16" => Self::Portrait9x16,
            other => {
                let choices = Self::ALL
                    .iter()
                    .map(|ratio| ratio.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(format!("Unknown aspect ratio '{other}' (expected one of: {choices})."));
            }
        };
        Ok(parsed)
    }
}

/// Per-session generation settings. A value type: the session replaces it
/// wholesale when the user changes a setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPreferences {
    pub mode: PerformanceMode,
    pub aspect_ratio: AspectRatio,
    pub inference_steps: u32,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
}

impl Default for GenerationPreferences {
    fn default() -> Self {
        Self {
            mode: PerformanceMode::Fast,
            aspect_ratio: AspectRatio::Square,
            inference_steps: DEFAULT_INFERENCE_STEPS,
            negative_prompt: None,
            seed: None,
        }
    }
}

impl GenerationPreferences {
    pub fn with_mode(mode: PerformanceMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Returns a copy with one named setting replaced. Setting names match
    /// the chat command registry.
    pub fn updated(&self, setting: &str, raw: &str) -> anyhow::Result<Self> {
        let mut next = self.clone();
        let value = raw.trim();
        match setting {
            "mode" => {
                next.mode = value.parse().map_err(anyhow::Error::msg)?;
            }
            "aspect_ratio" => {
                next.aspect_ratio = if is_off(value) {
                    AspectRatio::default()
                } else {
                    value.parse().map_err(anyhow::Error::msg)?
                };
            }
            "inference_steps" if is_off(value) => {
                next.inference_steps = DEFAULT_INFERENCE_STEPS;
            }
            "inference_steps" => {
                let steps: i64 = value
                    .parse()
                    .with_context(|| format!("Inference steps must be a number, got '{value}'."))?;
                next.inference_steps =
                    steps.clamp(MIN_INFERENCE_STEPS as i64, MAX_INFERENCE_STEPS as i64) as u32;
            }
            "seed" => {
                next.seed = if is_off(value) {
                    None
                } else {
                    let seed: i64 = value
                        .parse()
                        .with_context(|| {
                            format!("Seed must be an integer or 'off', got '{value}'.")
                        })?;
                    (seed >= 0).then_some(seed)
                };
            }
            "negative_prompt" => {
                next.negative_prompt = if is_off(value) {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            other => bail!("Unknown setting '{other}'."),
        }
        Ok(next)
    }

    pub fn describe(&self) -> String {
        format!(
            "mode={} aspect={} steps={} seed={} negative={}",
            self.mode,
            self.aspect_ratio,
            self.inference_steps,
            self.seed
                .map(|seed| seed.to_string())
                .unwrap_or_else(|| "off".to_string()),
            self.negative_prompt.as_deref().unwrap_or("off"),
        )
    }
}

fn is_off(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "off" | "none" | "clear" | "-1"
    )
}

/// Appends the user's technical constraints (and the attached upload, if
/// any) to the request text the agent sees.
pub fn compose_request(
    text: &str,
    prefs: &GenerationPreferences,
    upload: Option<&str>,
) -> String {
    let mut out = format!("{}\n\n{CONSTRAINTS_HEADER}", text.trim_end());
    out.push_str(&format!("\n- Performance Mode: {}", prefs.mode));
    out.push_str(&format!("\n- Aspect Ratio: {}", prefs.aspect_ratio));
    out.push_str(&format!("\n- Inference Steps: {}", prefs.inference_steps));
    if let Some(negative) = prefs.negative_prompt.as_deref().filter(|v| !v.is_empty()) {
        out.push_str(&format!("\n- Negative Prompt: {negative}"));
    }
    if let Some(seed) = prefs.seed {
        out.push_str(&format!("\n- Seed: {seed}"));
    }
    if let Some(path) = upload.map(str::trim).filter(|path| !path.is_empty()) {
        out.push_str(&format!("\n\n{UPLOAD_PREFIX} {path}"));
    }
    out
}

/// Constraints recovered from a composed request. Every field is optional;
/// unparsable lines are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConstraints {
    pub mode: Option<PerformanceMode>,
    pub aspect_ratio: Option<AspectRatio>,
    pub inference_steps: Option<u32>,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
    pub upload: Option<String>,
}

/// Splits a composed request into the user's words and the parsed
/// constraint block.
pub fn split_request(text: &str) -> (String, RequestConstraints) {
    let mut constraints = RequestConstraints::default();
    let (body, tail) = match text.find(CONSTRAINTS_HEADER) {
        Some(idx) => (&text[..idx], &text[idx + CONSTRAINTS_HEADER.len()..]),
        None => match text.find(UPLOAD_PREFIX) {
            Some(idx) => (&text[..idx], &text[idx..]),
            None => (text, ""),
        },
    };

    for line in tail.lines() {
        let line = line.trim();
        if let Some(path) = line.strip_prefix(UPLOAD_PREFIX) {
            let path = path.trim();
            if !path.is_empty() {
                constraints.upload = Some(path.to_string());
            }
            continue;
        }
        let Some(entry) = line.strip_prefix("- ") else {
            continue;
        };
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Performance Mode" => constraints.mode = value.parse().ok(),
            "Aspect Ratio" => constraints.aspect_ratio = value.parse().ok(),
            "Inference Steps" => constraints.inference_steps = value.parse().ok(),
            "Negative Prompt" => {
                constraints.negative_prompt = Some(value.to_string()).filter(|v| !v.is_empty())
            }
            "Seed" => constraints.seed = value.parse().ok(),
            _ => {}
        }
    }

    (body.trim().to_string(), constraints)
}

#[cfg(test)]
mod tests {
    use super::{
        compose_request, split_request, AspectRatio, GenerationPreferences, CONSTRAINTS_HEADER,
    };
    use crate::models::PerformanceMode;

    #[test]
    fn compose_appends_constraint_block_and_upload() {
        let prefs = GenerationPreferences {
            mode: PerformanceMode::Pro,
            aspect_ratio: AspectRatio::Landscape16x9,
            inference_steps: 20,
            negative_prompt: Some("blurry".to_string()),
            seed: Some(7),
        };
        let composed = compose_request("a castle at dusk", &prefs, Some("/tmp/in.png"));
        assert_eq!(
            composed,
            "a castle at dusk\n\n[User Technical Constraints]\n- Performance Mode: pro\n- Aspect Ratio: landscape_16_9\n- Inference Steps: 20\n- Negative Prompt: blurry\n- Seed: 7\n\nUploaded file path: /tmp/in.png"
        );
    }

    #[test]
    fn defaults_omit_optional_lines() {
        let composed = compose_request("hi", &GenerationPreferences::default(), None);
        assert!(composed.contains(CONSTRAINTS_HEADER));
        assert!(!composed.contains("Seed"));
        assert!(!composed.contains("Negative Prompt"));
        assert!(!composed.contains("Uploaded file path"));
    }

    #[test]
    fn split_recovers_body_and_constraints() {
        let prefs = GenerationPreferences {
            seed: Some(42),
            aspect_ratio: AspectRatio::Portrait9x16,
            ..GenerationPreferences::default()
        };
        let composed = compose_request("make a video of waves", &prefs, Some("/tmp/x.jpg"));
        let (body, constraints) = split_request(&composed);
        assert_eq!(body, "make a video of waves");
        assert_eq!(constraints.seed, Some(42));
        assert_eq!(constraints.aspect_ratio, Some(AspectRatio::Portrait9x16));
        assert_eq!(constraints.mode, Some(PerformanceMode::Fast));
        assert_eq!(constraints.upload.as_deref(), Some("/tmp/x.jpg"));

        let (plain, none) = split_request("just words");
        assert_eq!(plain, "just words");
        assert_eq!(none.aspect_ratio, None);
    }

    #[test]
    fn updated_parses_and_clamps_settings() -> anyhow::Result<()> {
        let prefs = GenerationPreferences::default();
        assert_eq!(prefs.updated("inference_steps", "500")?.inference_steps, 50);
        assert_eq!(prefs.updated("inference_steps", "0")?.inference_steps, 1);
        assert_eq!(prefs.updated("inference_steps", "off")?.inference_steps, 4);
        assert_eq!(prefs.updated("seed", "-1")?.seed, None);
        assert_eq!(prefs.updated("seed", "12")?.seed, Some(12));
        assert_eq!(
            prefs.updated("aspect_ratio", "16:9")?.aspect_ratio,
            AspectRatio::Landscape16x9
        );
        assert_eq!(prefs.updated("mode", "PRO")?.mode, PerformanceMode::Pro);
        let negative = prefs.updated("negative_prompt", "text, watermark")?;
        assert_eq!(negative.negative_prompt.as_deref(), Some("text, watermark"));
        assert_eq!(negative.updated("negative_prompt", "off")?.negative_prompt, None);

        assert!(prefs.updated("seed", "abc").is_err());
        assert!(prefs.updated("aspect_ratio", "tall").is_err());
        assert!(prefs.updated("volume", "11").is_err());
        assert_eq!(prefs, GenerationPreferences::default());
        Ok(())
    }

    #[test]
    fn aspect_ratio_maps_to_provider_vocabularies() {
        assert_eq!(AspectRatio::Square.image_size_preset(), "square_hd");
        assert_eq!(AspectRatio::Portrait3x4.image_size_preset(), "portrait_4_3");
        assert_eq!(AspectRatio::Portrait9x16.video_ratio(), "9:16");
        assert_eq!(AspectRatio::Landscape4x3.video_ratio(), "4:3");
    }
}
