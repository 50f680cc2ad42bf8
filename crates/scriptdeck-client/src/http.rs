use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::hub::{ClientError, ScriptHub, SubmitField, SubmitForm};
use crate::types::{JobId, JobRecord, ScriptInfo};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LONG_POLL_TIMEOUT_MS: u64 = 70_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpScriptHubConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Applied to the blocking output endpoint and to uploads, both of
    /// which legitimately outlive the plain request timeout.
    pub long_poll_timeout_ms: u64,
    pub request_attempts: usize,
}

impl HttpScriptHubConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            long_poll_timeout_ms: DEFAULT_LONG_POLL_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

/// reqwest-backed [`ScriptHub`] over a launcher server's HTTP surface.
#[derive(Debug, Clone)]
pub struct HttpScriptHub {
    base_url: String,
    timeout: Duration,
    long_poll_timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl HttpScriptHub {
    pub fn new(config: HttpScriptHubConfig) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            long_poll_timeout: Duration::from_millis(config.long_poll_timeout_ms.max(1_000)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_base_url(base_url: &str) -> Result<Self, ClientError> {
        Self::new(HttpScriptHubConfig::new(base_url))
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    #[must_use]
    pub fn scripts_path() -> &'static str {
        "/scripts/"
    }

    #[must_use]
    pub fn submit_path(script: &str) -> String {
        format!("/scripts/{}", script.trim())
    }

    #[must_use]
    pub fn running_path() -> &'static str {
        "/running/"
    }

    #[must_use]
    pub fn run_path(id: &JobId) -> String {
        format!("/running/{}", id.as_str())
    }

    #[must_use]
    pub fn output_path(id: &JobId, from: usize) -> String {
        format!("/running/{}/output?from={from}", id.as_str())
    }

    #[must_use]
    pub fn kill_path(id: &JobId) -> String {
        format!("/running/{}/kill", id.as_str())
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self
            .send_get(path, self.timeout, self.request_attempts)
            .await?;
        decode_json_response(response).await
    }

    async fn send_get(
        &self,
        path: &str,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.endpoint(path);
        let mut last_error: Option<ClientError> = None;

        for attempt in 0..attempts {
            let request = self
                .http
                .get(url.as_str())
                .header("x-request-id", request_id())
                .timeout(timeout);

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(map_send_error(&error));
                    if attempt + 1 >= attempts {
                        break;
                    }
                    debug!(%url, attempt, %error, "request failed, retrying");
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Request {
            message: "unknown".to_string(),
        }))
    }

    /// Fire a bodyless request, retrying transport failures. Used for the
    /// idempotent kill and delete calls.
    async fn send_empty(&self, method: reqwest::Method, path: &str) -> Result<(), ClientError> {
        let url = self.endpoint(path);
        let mut last_error: Option<ClientError> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-request-id", request_id())
                .timeout(self.timeout);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let bytes = response.bytes().await.map_err(|error| ClientError::Read {
                        message: error.to_string(),
                    })?;
                    if status.is_success() {
                        return Ok(());
                    }
                    return Err(http_error(status.as_u16(), &bytes));
                }
                Err(error) => {
                    last_error = Some(map_send_error(&error));
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                    debug!(%url, attempt, %error, "request failed, retrying");
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Request {
            message: "unknown".to_string(),
        }))
    }
}

#[async_trait]
impl ScriptHub for HttpScriptHub {
    async fn scripts(&self) -> Result<Vec<ScriptInfo>, ClientError> {
        self.get_json(Self::scripts_path()).await
    }

    async fn running(&self) -> Result<Vec<JobRecord>, ClientError> {
        self.get_json(Self::running_path()).await
    }

    async fn run_detail(&self, id: &JobId) -> Result<JobRecord, ClientError> {
        self.get_json(Self::run_path(id).as_str()).await
    }

    async fn output(&self, id: &JobId, from: usize) -> Result<String, ClientError> {
        // Single attempt: a timeout here just means nothing new arrived,
        // and the caller re-issues as part of the long-poll cycle.
        let response = self
            .send_get(&Self::output_path(id, from), self.long_poll_timeout, 1)
            .await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
        if !status.is_success() {
            return Err(http_error(status.as_u16(), &bytes));
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    async fn submit(
        &self,
        form: SubmitForm,
        progress: watch::Sender<f64>,
    ) -> Result<JobId, ClientError> {
        let url = self.endpoint(&Self::submit_path(&form.script));
        let total: u64 = form.fields.iter().map(|field| field.byte_len() as u64).sum();
        let meter = Arc::new(UploadMeter {
            sent: AtomicU64::new(0),
            total,
            progress,
        });

        let mut multipart = reqwest::multipart::Form::new();
        for (index, field) in form.fields.into_iter().enumerate() {
            let name = format!("arg{index}");
            let part = match field {
                SubmitField::Text(value) => {
                    let len = value.len() as u64;
                    reqwest::multipart::Part::stream_with_length(
                        reqwest::Body::wrap_stream(metered_stream(
                            value.into_bytes(),
                            Arc::clone(&meter),
                        )),
                        len,
                    )
                }
                SubmitField::File { file_name, bytes } => {
                    let len = bytes.len() as u64;
                    reqwest::multipart::Part::stream_with_length(
                        reqwest::Body::wrap_stream(metered_stream(bytes, Arc::clone(&meter))),
                        len,
                    )
                    .file_name(file_name)
                }
            };
            multipart = multipart.part(name, part);
        }

        // Never retried: a second attempt would launch the script twice.
        let response = self
            .http
            .post(url)
            .header("x-request-id", request_id())
            .timeout(self.long_poll_timeout)
            .multipart(multipart)
            .send()
            .await
            .map_err(|error| map_send_error(&error))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
        if !status.is_success() {
            return Err(http_error(status.as_u16(), body.as_bytes()));
        }
        meter.finish();
        Ok(JobId::new(body.trim().to_string()))
    }

    async fn kill(&self, id: &JobId) -> Result<(), ClientError> {
        self.send_empty(reqwest::Method::POST, &Self::kill_path(id))
            .await
    }

    async fn delete(&self, id: &JobId) -> Result<(), ClientError> {
        self.send_empty(reqwest::Method::DELETE, &Self::run_path(id))
            .await
    }
}

struct UploadMeter {
    sent: AtomicU64,
    total: u64,
    progress: watch::Sender<f64>,
}

impl UploadMeter {
    fn add(&self, bytes: usize) {
        let done = self.sent.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
        if self.total > 0 {
            let fraction = (done as f64 / self.total as f64).clamp(0.0, 1.0);
            self.progress.send_replace(fraction);
        }
    }

    fn finish(&self) {
        self.progress.send_replace(1.0);
    }
}

fn metered_stream(
    bytes: Vec<u8>,
    meter: Arc<UploadMeter>,
) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    futures::stream::iter(chunk_bytes(bytes)).map(move |chunk| {
        meter.add(chunk.len());
        Ok(chunk)
    })
}

fn chunk_bytes(bytes: Vec<u8>) -> Vec<Vec<u8>> {
    bytes
        .chunks(UPLOAD_CHUNK_BYTES)
        .map(<[u8]>::to_vec)
        .collect()
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn map_send_error(error: &reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Request {
            message: error.to_string(),
        }
    }
}

fn http_error(status: u16, body: &[u8]) -> ClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ClientError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ClientError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(http_error(status.as_u16(), &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
