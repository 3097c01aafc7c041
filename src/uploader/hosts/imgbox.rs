use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::backend::{ProgressCallback, UploadOptions, UploadResult, UploadResults};
use crate::uploader::batch::{upload_all, Schedule};
use crate::uploader::client::{with_retry, RetryConfig};

/// Settings used to open one gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GallerySettings {
    pub title: Option<String>,
    pub thumb_width: u32,
    pub square_thumbs: bool,
    pub adult: bool,
    pub comments_enabled: bool,
}

impl From<&UploadOptions> for GallerySettings {
    fn from(options: &UploadOptions) -> Self {
        Self {
            title: options.gallery_title.clone().filter(|t| !t.trim().is_empty()),
            thumb_width: options.thumb_width,
            square_thumbs: options.square_thumbs,
            adult: options.adult,
            comments_enabled: options.comments_enabled,
        }
    }
}

/// What the gallery client reports for one submitted file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub success: bool,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub web_url: Option<String>,
    pub gallery_url: Option<String>,
    pub error: Option<String>,
}

/// External client able to open galleries on the host.
#[async_trait]
pub trait GalleryProvider: Send + Sync {
    async fn create_gallery(&self, settings: &GallerySettings) -> AppResult<Box<dyn Gallery>>;
}

/// An open gallery; files are submitted into it, then it is closed.
#[async_trait]
pub trait Gallery: Send + Sync {
    async fn submit(&self, filepath: &Path) -> AppResult<Submission>;

    async fn close(&self) -> AppResult<()>;
}

/// Gallery-delegated host: one gallery per call, every file submitted into it.
pub struct ImgBoxBackend {
    provider: Arc<dyn GalleryProvider>,
    retry: RetryConfig,
}

impl fmt::Debug for ImgBoxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImgBoxBackend")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ImgBoxBackend {
    pub fn new(provider: Arc<dyn GalleryProvider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    pub async fn upload(
        &self,
        filepaths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
        options: &UploadOptions,
    ) -> AppResult<UploadResults> {
        if filepaths.is_empty() {
            return Ok(UploadResults::new());
        }

        let settings = GallerySettings::from(options);
        let gallery = self
            .provider
            .create_gallery(&settings)
            .await
            .map_err(|e| AppError::Gallery(format!("Failed to create gallery: {}", e)))?;

        let results = {
            let gallery = gallery.as_ref();
            upload_all(
                "ImageBox",
                filepaths,
                Schedule::Windowed(options.batch_size),
                progress,
                move |_, path| self.submit(gallery, path),
            )
            .await
        };

        if let Err(e) = gallery.close().await {
            log::warn!("Failed to close ImageBox gallery: {}", e);
        }

        Ok(results)
    }

    async fn submit(&self, gallery: &dyn Gallery, path: PathBuf) -> AppResult<UploadResult> {
        InputValidator::validate_upload_target(&path)?;

        let label = path.display().to_string();
        let submission = with_retry(&self.retry, &label, |_| gallery.submit(&path)).await?;

        match submission {
            Submission {
                success: true,
                image_url: Some(image_url),
                thumbnail_url,
                ..
            } if !image_url.is_empty() => Ok(UploadResult::success(image_url, thumbnail_url)),
            Submission { error, .. } => Err(AppError::Gallery(
                error.unwrap_or_else(|| "Submission was not accepted".to_string()),
            )),
        }
    }
}
