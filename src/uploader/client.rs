use crate::errors::{AppError, AppResult};
use reqwest::header::RETRY_AFTER;
use reqwest::{multipart, Client, RequestBuilder, Response};
use std::cmp::min;
use std::future::Future;
use std::path::Path;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per item, the first one included.
    pub max_attempts: u32,
    /// One backoff "time unit"; attempt `n` waits `2^n` of these.
    pub backoff_unit: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.backoff_unit.saturating_mul(factor);
        min(delay, self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only errors for which [`AppError::is_retryable`] holds are retried. The
/// closure receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, label: &str, mut op: F) -> AppResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= retry.max_attempts {
            if error.is_retryable() {
                log::warn!(
                    "Giving up on {} after {} attempts: {}",
                    label,
                    attempt,
                    error
                );
            }
            return Err(error);
        }

        let delay = error
            .retry_after()
            .map(|requested| min(requested, retry.max_delay))
            .unwrap_or_else(|| retry.backoff_delay(attempt));

        log::warn!(
            "Attempt {} for {} failed, retrying in {:?}: {}",
            attempt,
            label,
            delay,
            error
        );
        sleep(delay).await;
    }
}

/// Shared HTTP client for image hosts, with per-call timeout and retry policy.
#[derive(Debug, Clone)]
pub struct HostClient {
    client: Client,
    retry: RetryConfig,
}

impl HostClient {
    pub fn new(settings: &ClientSettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            retry: settings.retry.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Send a request built fresh on every attempt (multipart bodies are not
    /// reusable) and return the first successful response.
    pub async fn send_with_retry<F>(&self, label: &str, build: F) -> AppResult<Response>
    where
        F: Fn(&Client) -> AppResult<RequestBuilder>,
    {
        let build = &build;
        let client = &self.client;

        with_retry(&self.retry, label, move |_attempt| async move {
            let request = build(client)?;
            let response = request.send().await?;
            check_status(response).await
        })
        .await
    }
}

/// Sort a response into success, retryable failure or permanent failure.
pub async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if should_retry_error(status.as_u16()) {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|seconds| seconds.is_finite() && (0.0..86_400.0).contains(seconds))
            .map(Duration::from_secs_f64);

        return Err(AppError::TransientHost {
            status: status.as_u16(),
            retry_after,
        });
    }

    let reason = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(AppError::UploadRejected {
        status: status.as_u16(),
        reason: reason.chars().take(300).collect(),
    })
}

pub fn should_retry_error(status_code: u16) -> bool {
    matches!(status_code, 429 | 500 | 502 | 503 | 504)
}

/// Helper struct to hold multipart upload data
#[derive(Debug, Clone, Default)]
pub struct UploadPayload {
    files: Vec<(String, Vec<u8>, String, String)>, // (filename, data, mime_type, field_name)
    text_fields: Vec<(String, String)>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text_field(&mut self, key: &str, value: &str) {
        self.text_fields.push((key.to_string(), value.to_string()));
    }

    pub async fn add_file(&mut self, file_path: &Path, field_name: &str) -> AppResult<()> {
        let file_contents = tokio::fs::read(file_path).await?;
        let filename = file_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        self.files.push((
            filename,
            file_contents,
            mime_for_path(file_path).to_string(),
            field_name.to_string(),
        ));
        Ok(())
    }

    pub fn build_form(&self) -> AppResult<multipart::Form> {
        let mut form = multipart::Form::new();

        for (key, value) in &self.text_fields {
            form = form.text(key.clone(), value.clone());
        }

        for (filename, data, mime_type, field_name) in &self.files {
            let part = multipart::Part::bytes(data.clone())
                .file_name(filename.clone())
                .mime_str(mime_type)?;

            form = form.part(field_name.clone(), part);
        }

        Ok(form)
    }
}

/// Detect MIME type based on file extension
pub fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
