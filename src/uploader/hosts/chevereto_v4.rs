use std::path::PathBuf;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::backend::{
    parse_chevereto_image, ProgressCallback, UploadOptions, UploadResult, UploadResults,
};
use crate::uploader::batch::{upload_all, Schedule};
use crate::uploader::client::{ClientSettings, HostClient, UploadPayload};

const API_SUFFIX: &str = "api/1/upload";

/// Chevereto v4 API host: raw multipart `source` plus API key.
#[derive(Debug)]
pub struct CheveretoV4Backend {
    api_key: Option<String>,
    endpoint: String,
    client: HostClient,
}

impl CheveretoV4Backend {
    pub fn new(base_url: &str, api_key: Option<&str>, settings: &ClientSettings) -> AppResult<Self> {
        Ok(Self {
            api_key: api_key.map(str::to_string),
            endpoint: create_api_url(base_url),
            client: HostClient::new(settings)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn upload(
        &self,
        filepaths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
        options: &UploadOptions,
    ) -> AppResult<UploadResults> {
        let api_key = InputValidator::require_credential("an API key", self.api_key.as_deref())?;

        if filepaths.is_empty() {
            return Ok(UploadResults::new());
        }

        Ok(upload_all(
            "Chevereto v4",
            filepaths,
            Schedule::Windowed(options.batch_size),
            progress,
            move |_, path| self.upload_image(api_key, path),
        )
        .await)
    }

    async fn upload_image(&self, api_key: &str, path: PathBuf) -> AppResult<UploadResult> {
        InputValidator::validate_upload_target(&path)?;

        let mut payload = UploadPayload::new();
        payload.add_text_field("key", api_key);
        payload.add_text_field("format", "json");
        payload.add_file(&path, "source").await?;

        let label = path.display().to_string();
        let response = self
            .client
            .send_with_retry(&label, |client| {
                Ok(client
                    .post(&self.endpoint)
                    .header("X-API-Key", api_key)
                    .multipart(payload.build_form()?))
            })
            .await?;

        let body: serde_json::Value = response.json().await?;
        parse_chevereto_image(&body)
            .ok_or_else(|| AppError::invalid_response("Missing image URL in Chevereto v4 response"))
    }
}

/// Append `api/1/upload` unless the URL already points at it.
fn create_api_url(image_url: &str) -> String {
    let trimmed = image_url.trim();
    if trimmed.ends_with(API_SUFFIX) {
        return trimmed.to_string();
    }
    if let Some(stripped) = trimmed.strip_suffix('/') {
        if stripped.ends_with(API_SUFFIX) {
            return stripped.to_string();
        }
        return format!("{}/{}", stripped, API_SUFFIX);
    }
    format!("{}/{}", trimmed, API_SUFFIX)
}
