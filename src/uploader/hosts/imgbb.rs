use base64::{engine::general_purpose, Engine as _};
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::backend::{
    parse_chevereto_image, ProgressCallback, UploadOptions, UploadResult, UploadResults,
};
use crate::uploader::batch::{upload_all, Schedule};
use crate::uploader::client::{ClientSettings, HostClient};

pub const IMGBB_BASE_URL: &str = "https://api.imgbb.com";
const UPLOAD_SUFFIX: &str = "/1/upload";

/// API-key host taking each image as a base64 form field.
#[derive(Debug)]
pub struct ImgBbBackend {
    api_key: Option<String>,
    endpoint: String,
    client: HostClient,
}

impl ImgBbBackend {
    pub fn new(api_key: Option<&str>, settings: &ClientSettings) -> AppResult<Self> {
        Self::with_base_url(api_key, IMGBB_BASE_URL, settings)
    }

    pub fn with_base_url(
        api_key: Option<&str>,
        base_url: &str,
        settings: &ClientSettings,
    ) -> AppResult<Self> {
        Ok(Self {
            api_key: api_key.map(str::to_string),
            endpoint: upload_endpoint(base_url),
            client: HostClient::new(settings)?,
        })
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
            "ImageBB",
            filepaths,
            Schedule::Limited(options.batch_size),
            progress,
            move |_, path| self.upload_image(api_key, path),
        )
        .await)
    }

    async fn upload_image(&self, api_key: &str, path: PathBuf) -> AppResult<UploadResult> {
        InputValidator::validate_upload_target(&path)?;

        let contents = tokio::fs::read(&path).await?;
        let encoded = general_purpose::STANDARD.encode(contents);
        let form = [("key", api_key), ("image", encoded.as_str())];

        let label = path.display().to_string();
        let response = self
            .client
            .send_with_retry(&label, |client| Ok(client.post(&self.endpoint).form(&form)))
            .await?;

        let body: serde_json::Value = response.json().await?;
        parse_chevereto_image(&body)
            .ok_or_else(|| AppError::invalid_response("Missing image URL in ImageBB response"))
    }
}

/// Make sure the endpoint ends with the versioned upload path.
fn upload_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with(UPLOAD_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, UPLOAD_SUFFIX)
    }
}
