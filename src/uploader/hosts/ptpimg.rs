use reqwest::header::REFERER;
use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::backend::{ProgressCallback, UploadOptions, UploadResult, UploadResults};
use crate::uploader::batch::{upload_all, Schedule};
use crate::uploader::client::{ClientSettings, HostClient, UploadPayload};

pub const PTPIMG_BASE_URL: &str = "https://ptpimg.me";

#[derive(Debug, Deserialize)]
struct UploadedImage {
    code: String,
    ext: String,
}

/// API-key host answering with `[{"code", "ext"}]`; the image URL is built
/// from those two fields.
#[derive(Debug)]
pub struct PtpImgBackend {
    api_key: Option<String>,
    base_url: String,
    client: HostClient,
}

impl PtpImgBackend {
    pub fn new(api_key: Option<&str>, settings: &ClientSettings) -> AppResult<Self> {
        Self::with_base_url(api_key, PTPIMG_BASE_URL, settings)
    }

    pub fn with_base_url(
        api_key: Option<&str>,
        base_url: &str,
        settings: &ClientSettings,
    ) -> AppResult<Self> {
        Ok(Self {
            api_key: api_key.map(str::to_string),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
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
            "PTPIMG",
            filepaths,
            Schedule::Limited(options.batch_size),
            progress,
            move |_, path| self.upload_image(api_key, path),
        )
        .await)
    }

    async fn upload_image(&self, api_key: &str, path: PathBuf) -> AppResult<UploadResult> {
        InputValidator::validate_upload_target(&path)?;

        let mut payload = UploadPayload::new();
        payload.add_file(&path, "file-upload[0]").await?;
        payload.add_text_field("format", "json");
        payload.add_text_field("api_key", api_key);

        let url = format!("{}/upload.php", self.base_url);
        let referer = format!("{}/index.php", self.base_url);
        let label = path.display().to_string();

        let response = self
            .client
            .send_with_retry(&label, |client| {
                Ok(client
                    .post(&url)
                    .header(REFERER, referer.as_str())
                    .multipart(payload.build_form()?))
            })
            .await?;

        let uploaded: Vec<UploadedImage> = response.json().await?;
        let first = uploaded
            .into_iter()
            .next()
            .ok_or_else(|| AppError::invalid_response("PTPIMG accepted no files"))?;

        Ok(UploadResult::success(
            format!("{}/{}.{}", self.base_url, first.code, first.ext),
            None,
        ))
    }
}
