use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use genchat_contracts::context::current_request;
use genchat_contracts::request::split_request;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{MediaBackend, MediaBytes};

const DRYRUN_HOST: &str = "https://dryrun.invalid";
const PREVIEW_MAX_SIDE: u32 = 256;
const VIDEO_MARKER: &[u8] = b"GENCHAT-DRYRUN-VIDEO\n";

/// Offline backend. Jobs return `dryrun.invalid` URLs; downloading one
/// synthesizes a solid-colour PNG (colour from a hash of the job) or a small
/// placeholder video payload. The LLM endpoint answers with a protocol reply.
pub struct DryrunBackend {
    llm_endpoint: String,
    latency: Duration,
    counter: AtomicU64,
}

impl DryrunBackend {
    pub fn new(llm_endpoint: &str) -> Self {
        Self {
            llm_endpoint: llm_endpoint.to_string(),
            latency: Duration::ZERO,
            counter: AtomicU64::new(0),
        }
    }

    /// Sleeps this long inside every job, to make progress updates visible.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_id(&self, endpoint: &str, arguments: &Value) -> String {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update(serde_json::to_vec(arguments).unwrap_or_default());
        hasher.update(idx.to_be_bytes());
        hex::encode(&hasher.finalize()[..6])
    }

    fn llm_reply(arguments: &Value) -> Value {
        let prompt = arguments
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reply = match prompt.rfind("Observation:") {
            Some(idx) => {
                let observation = prompt[idx + "Observation:".len()..].trim();
                json!({ "final_answer": observation })
            }
            None => {
                let (body, _) = split_request(current_request(prompt));
                json!({
                    "tool": "fal_image_generation",
                    "arguments": { "prompt": body }
                })
            }
        };
        json!({ "output": reply.to_string() })
    }

    fn is_video_job(endpoint: &str, arguments: &Value) -> bool {
        let lowered = endpoint.to_ascii_lowercase();
        arguments.get("duration").is_some()
            || ["video", "veo", "luma", "kling"]
                .iter()
                .any(|needle| lowered.contains(needle))
    }

    fn image_dims(arguments: &Value) -> (u32, u32) {
        let size = arguments.get("image_size");
        let dim = |key: &str| {
            size.and_then(|value| value.get(key))
                .and_then(Value::as_u64)
                .map(|value| value.clamp(1, 4096) as u32)
        };
        match (dim("width"), dim("height")) {
            (Some(width), Some(height)) => (width, height),
            _ => match size.and_then(Value::as_str) {
                Some("landscape_16_9") => (1024, 576),
                Some("landscape_4_3") => (1024, 768),
                Some("portrait_16_9") => (576, 1024),
                Some("portrait_4_3") => (768, 1024),
                _ => (1024, 1024),
            },
        }
    }
}

impl MediaBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn run_job(&self, endpoint: &str, arguments: &Value) -> Result<Value> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if endpoint == self.llm_endpoint {
            return Ok(Self::llm_reply(arguments));
        }

        if Self::is_video_job(endpoint, arguments) {
            let id = self.next_id(endpoint, arguments);
            return Ok(json!({
                "video": { "url": format!("{DRYRUN_HOST}/video/{id}.mp4") }
            }));
        }

        let count = arguments
            .get("num_images")
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .clamp(1, 4);
        let (width, height) = Self::image_dims(arguments);
        let images = (0..count)
            .map(|_| {
                let id = self.next_id(endpoint, arguments);
                json!({
                    "url": format!("{DRYRUN_HOST}/image/{id}.png?w={width}&h={height}"),
                    "width": width,
                    "height": height,
                })
            })
            .collect::<Vec<Value>>();
        let seed = arguments.get("seed").cloned().unwrap_or(Value::Null);
        Ok(json!({ "images": images, "seed": seed }))
    }

    fn upload(&self, path: &Path) -> Result<String> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a file", path.display());
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(format!("{DRYRUN_HOST}/upload/{name}"))
    }

    fn download(&self, url: &str) -> Result<MediaBytes> {
        let Some(rest) = url.strip_prefix(DRYRUN_HOST) else {
            bail!("dryrun backend cannot download {url}");
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        if path.starts_with("/video/") {
            let mut bytes = VIDEO_MARKER.to_vec();
            bytes.extend_from_slice(path.as_bytes());
            return Ok(MediaBytes {
                bytes,
                mime_type: Some("video/mp4".to_string()),
            });
        }
        if !path.starts_with("/image/") {
            bail!("dryrun backend has nothing at {url}");
        }

        let query_dim = |key: &str| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(name, _)| *name == key)
                .and_then(|(_, value)| value.parse::<u32>().ok())
                .unwrap_or(PREVIEW_MAX_SIDE)
        };
        let (width, height) = preview_dims(query_dim("w"), query_dim("h"));
        let (r, g, b) = color_from_seed(path);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode dryrun PNG")?;
        Ok(MediaBytes {
            bytes,
            mime_type: Some("image/png".to_string()),
        })
    }
}

fn preview_dims(width: u32, height: u32) -> (u32, u32) {
    let width = width.max(1);
    let height = height.max(1);
    let longest = width.max(height);
    if longest <= PREVIEW_MAX_SIDE {
        return (width, height);
    }
    let scale = PREVIEW_MAX_SIDE as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

fn color_from_seed(seed: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(seed.as_bytes());
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{preview_dims, DryrunBackend};
    use crate::backend::{extract_media_urls, MediaBackend};

    #[test]
    fn image_jobs_return_requested_count_and_decodable_pngs() -> anyhow::Result<()> {
        let backend = DryrunBackend::new("fal-ai/any-llm");
        let result = backend.run_job(
            "fal-ai/flux/schnell",
            &json!({
                "prompt": "a red apple",
                "num_images": 3,
                "image_size": {"width": 720, "height": 360},
            }),
        )?;
        let mut urls = Vec::new();
        extract_media_urls(&result, &mut urls);
        assert_eq!(urls.len(), 3);

        let media = backend.download(&urls[0])?;
        assert_eq!(media.mime_type.as_deref(), Some("image/png"));
        let decoded = image::load_from_memory(&media.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (256, 128));
        Ok(())
    }

    #[test]
    fn video_jobs_return_one_video() -> anyhow::Result<()> {
        let backend = DryrunBackend::new("fal-ai/any-llm");
        let result = backend.run_job("fal-ai/veo3/fast", &json!({"prompt": "waves"}))?;
        let url = result["video"]["url"].as_str().unwrap_or_default().to_string();
        assert!(url.ends_with(".mp4"));
        let media = backend.download(&url)?;
        assert_eq!(media.mime_type.as_deref(), Some("video/mp4"));
        Ok(())
    }

    #[test]
    fn llm_endpoint_calls_a_tool_then_answers() -> anyhow::Result<()> {
        let backend = DryrunBackend::new("fal-ai/any-llm");
        let first = backend.run_job(
            "fal-ai/any-llm",
            &json!({"prompt": "User: Current request: a cat\n\n[User Technical Constraints]\n- Seed: 1"}),
        )?;
        let first: Value = serde_json::from_str(first["output"].as_str().unwrap_or("{}"))?;
        assert_eq!(first["tool"], json!("fal_image_generation"));
        assert_eq!(first["arguments"]["prompt"], json!("a cat"));

        let second = backend.run_job(
            "fal-ai/any-llm",
            &json!({"prompt": "User: a cat\n\nObservation: Generated 1 image(s): /tmp/x.png"}),
        )?;
        let second: Value = serde_json::from_str(second["output"].as_str().unwrap_or("{}"))?;
        assert_eq!(second["final_answer"], json!("Generated 1 image(s): /tmp/x.png"));
        Ok(())
    }

    #[test]
    fn upload_requires_an_existing_file() -> anyhow::Result<()> {
        let backend = DryrunBackend::new("fal-ai/any-llm");
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("in.jpg");
        assert!(backend.upload(&path).is_err());
        std::fs::write(&path, b"jpg")?;
        assert!(backend.upload(&path)?.ends_with("/upload/in.jpg"));
        assert!(backend.download("https://elsewhere.invalid/a.png").is_err());
        Ok(())
    }

    #[test]
    fn previews_keep_aspect_within_bounds() {
        assert_eq!(preview_dims(2048, 1024), (256, 128));
        assert_eq!(preview_dims(100, 50), (100, 50));
        assert_eq!(preview_dims(0, 0), (1, 1));
    }
}
