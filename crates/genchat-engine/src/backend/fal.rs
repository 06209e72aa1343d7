use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genchat_contracts::media::mime_for_path;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{response_json_or_error, truncate_text, MediaBackend, MediaBytes};
use crate::settings::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// fal.ai queue API: submit, poll `status_url` until `COMPLETED`, then read
/// `response_url`.
pub struct FalBackend {
    api_key: Option<String>,
    queue_base: String,
    storage_base: String,
    poll_interval: Duration,
    job_timeout: Duration,
    inline_uploads: bool,
    http: HttpClient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedJob {
    request_id: String,
    status_url: String,
    response_url: String,
}

impl FalBackend {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_key: settings.fal_key.clone(),
            queue_base: settings.queue_base.clone(),
            storage_base: settings.storage_base.clone(),
            poll_interval: settings.api_poll_interval,
            job_timeout: settings.api_timeout,
            inline_uploads: settings.inline_uploads,
            http,
        })
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("FAL_KEY (or FAL_API_KEY) not set"),
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        let trimmed = endpoint.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        format!("{}/{}", self.queue_base, trimmed.trim_matches('/'))
    }

    /// Status and result URLs live under the app id (`owner/app`), not the
    /// full endpoint path.
    fn app_url(&self, endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        let app = trimmed.splitn(3, '/').take(2).collect::<Vec<_>>().join("/");
        format!("{}/{}", self.queue_base, app)
    }

    fn parse_queued(&self, endpoint: &str, payload: &Value) -> Result<QueuedJob> {
        let request_id = payload
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .context("fal submit response has no request_id")?
            .to_string();
        let base = format!("{}/requests/{request_id}", self.app_url(endpoint));
        let url_field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Ok(QueuedJob {
            status_url: url_field("status_url").unwrap_or_else(|| format!("{base}/status")),
            response_url: url_field("response_url").unwrap_or(base),
            request_id,
        })
    }

    fn submit(&self, endpoint: &str, arguments: &Value, key: &str) -> Result<QueuedJob> {
        let url = self.endpoint_url(endpoint);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Key {key}"))
            .json(arguments)
            .send()
            .with_context(|| format!("fal submit failed ({url})"))?;
        let payload = response_json_or_error("fal submit", response)?;
        self.parse_queued(endpoint, &payload)
    }

    fn wait_for_completion(&self, job: &QueuedJob, key: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(&job.status_url)
                .header(AUTHORIZATION, format!("Key {key}"))
                .send()
                .with_context(|| format!("fal status poll failed ({})", job.status_url))?;
            let payload = response_json_or_error("fal status", response)?;
            let status = payload
                .get("status")
                .and_then(Value::as_str)
                .map(|value| value.to_ascii_uppercase())
                .unwrap_or_default();
            match status.as_str() {
                "COMPLETED" => {
                    if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
                        bail!("fal job {} failed: {}", job.request_id, error);
                    }
                    return Ok(());
                }
                "IN_QUEUE" | "IN_PROGRESS" => {}
                other => bail!(
                    "fal job {} returned unexpected status '{}'",
                    job.request_id,
                    other
                ),
            }
            if started.elapsed() >= self.job_timeout {
                bail!(
                    "fal job {} timed out after {:.0}s",
                    job.request_id,
                    self.job_timeout.as_secs_f64()
                );
            }
            debug!(request_id = %job.request_id, status = %status, "waiting on fal job");
            thread::sleep(self.poll_interval);
        }
    }

    fn fetch_result(&self, job: &QueuedJob, key: &str) -> Result<Value> {
        let response = self
            .http
            .get(&job.response_url)
            .header(AUTHORIZATION, format!("Key {key}"))
            .send()
            .with_context(|| format!("fal result request failed ({})", job.response_url))?;
        response_json_or_error("fal result", response)
    }

    fn path_to_data_url(path: &Path) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = mime_for_path(&path.to_string_lossy());
        Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    fn upload_to_storage(&self, path: &Path, key: &str) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = mime_for_path(&path.to_string_lossy());
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let initiate_url = format!(
            "{}/storage/upload/initiate?storage_type=fal-cdn-v3",
            self.storage_base
        );
        let response = self
            .http
            .post(&initiate_url)
            .header(AUTHORIZATION, format!("Key {key}"))
            .json(&json!({"content_type": mime, "file_name": file_name}))
            .send()
            .with_context(|| format!("fal upload initiate failed ({initiate_url})"))?;
        let payload = response_json_or_error("fal upload initiate", response)?;
        let upload_url = payload
            .get("upload_url")
            .and_then(Value::as_str)
            .context("fal upload initiate returned no upload_url")?;
        let file_url = payload
            .get("file_url")
            .and_then(Value::as_str)
            .context("fal upload initiate returned no file_url")?
            .to_string();

        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .context("fal upload PUT failed")?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!("fal upload failed ({code}): {}", truncate_text(&body, 512));
        }
        Ok(file_url)
    }
}

impl MediaBackend for FalBackend {
    fn name(&self) -> &str {
        "fal"
    }

    fn run_job(&self, endpoint: &str, arguments: &Value) -> Result<Value> {
        let key = self.api_key()?;
        let started = Instant::now();
        let job = self.submit(endpoint, arguments, key)?;
        info!(endpoint, request_id = %job.request_id, "fal job submitted");
        self.wait_for_completion(&job, key)?;
        let result = self.fetch_result(&job, key)?;
        info!(
            endpoint,
            request_id = %job.request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fal job completed"
        );
        Ok(result)
    }

    fn upload(&self, path: &Path) -> Result<String> {
        if self.inline_uploads {
            return Self::path_to_data_url(path);
        }
        let key = self.api_key()?;
        self.upload_to_storage(path, key)
    }

    fn download(&self, url: &str) -> Result<MediaBytes> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading fal media ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "fal media download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading fal media bytes")?
            .to_vec();
        Ok(MediaBytes { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::{FalBackend, QueuedJob};
    use crate::backend::MediaBackend;
    use crate::settings::Settings;

    fn backend(pairs: &[(&str, &str)]) -> anyhow::Result<FalBackend> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let settings = Settings::from_lookup(|key| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        });
        FalBackend::new(&settings)
    }

    #[test]
    fn endpoint_and_app_urls() -> anyhow::Result<()> {
        let fal = backend(&[])?;
        assert_eq!(
            fal.endpoint_url("fal-ai/flux/schnell"),
            "https://queue.fal.run/fal-ai/flux/schnell"
        );
        assert_eq!(fal.app_url("fal-ai/flux/schnell"), "https://queue.fal.run/fal-ai/flux");
        assert_eq!(fal.app_url("fal-ai/veo3"), "https://queue.fal.run/fal-ai/veo3");
        assert_eq!(
            fal.endpoint_url("http://127.0.0.1:8080/custom"),
            "http://127.0.0.1:8080/custom"
        );
        Ok(())
    }

    #[test]
    fn queued_job_prefers_returned_urls() -> anyhow::Result<()> {
        let fal = backend(&[])?;
        let job = fal.parse_queued(
            "fal-ai/nano-banana/edit",
            &json!({
                "request_id": "req-1",
                "status_url": "https://q.invalid/s",
                "response_url": "https://q.invalid/r"
            }),
        )?;
        assert_eq!(
            job,
            QueuedJob {
                request_id: "req-1".to_string(),
                status_url: "https://q.invalid/s".to_string(),
                response_url: "https://q.invalid/r".to_string(),
            }
        );

        let derived = fal.parse_queued("fal-ai/nano-banana/edit", &json!({"request_id": "req-2"}))?;
        assert_eq!(
            derived.status_url,
            "https://queue.fal.run/fal-ai/nano-banana/requests/req-2/status"
        );
        assert_eq!(
            derived.response_url,
            "https://queue.fal.run/fal-ai/nano-banana/requests/req-2"
        );

        assert!(fal.parse_queued("fal-ai/veo3", &json!({"status": "IN_QUEUE"})).is_err());
        Ok(())
    }

    #[test]
    fn missing_key_is_an_error_before_any_request() -> anyhow::Result<()> {
        let fal = backend(&[])?;
        let err = match fal.run_job("fal-ai/veo3", &json!({"prompt": "x"})) {
            Ok(_) => anyhow::bail!("expected missing key error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("FAL_KEY"));
        Ok(())
    }

    #[test]
    fn inline_uploads_become_data_urls() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("src.png");
        fs::write(&path, b"\x89PNG")?;
        let fal = backend(&[("GENCHAT_INLINE_UPLOADS", "1")])?;
        let url = fal.upload(&path)?;
        assert!(url.starts_with("data:image/png;base64,"));
        Ok(())
    }
}
