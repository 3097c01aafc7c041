use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::AppResult;

use super::hosts::{
    CheveretoV3Backend, CheveretoV4Backend, ImgBbBackend, ImgBoxBackend, PtpImgBackend,
};

/// Default number of files uploaded concurrently per window.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Outcome of one submitted file.
///
/// Both URLs empty means the item failed for good. A present `primary_url`
/// is a success even without a `secondary_url` (thumbnail/medium variant).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub primary_url: Option<String>,
    pub secondary_url: Option<String>,
}

impl UploadResult {
    pub fn success(primary_url: String, secondary_url: Option<String>) -> Self {
        Self {
            primary_url: Some(primary_url),
            secondary_url: secondary_url.filter(|url| !url.is_empty()),
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.primary_url.is_some()
    }
}

/// Results keyed by the position of the file in the submitted list.
pub type UploadResults = BTreeMap<usize, UploadResult>;

/// Called once per item, with its position, after the item reaches a
/// terminal state.
pub type ProgressCallback<'a> = dyn Fn(usize) + Send + Sync + 'a;

/// Host-specific parameters for one upload call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    pub batch_size: usize,
    /// Album name for hosts that group uploads into albums.
    pub album_name: Option<String>,
    pub album_description: String,
    /// Gallery settings for gallery-delegated hosts.
    pub gallery_title: Option<String>,
    pub thumb_width: u32,
    pub square_thumbs: bool,
    pub adult: bool,
    pub comments_enabled: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            album_name: None,
            album_description: String::new(),
            gallery_title: None,
            thumb_width: 350,
            square_thumbs: false,
            adult: false,
            comments_enabled: false,
        }
    }
}

/// Every image host this crate can talk to, behind one call shape.
#[derive(Debug)]
pub enum ImageHost {
    CheveretoV3(CheveretoV3Backend),
    ImgBb(ImgBbBackend),
    CheveretoV4(CheveretoV4Backend),
    ImgBox(ImgBoxBackend),
    PtpImg(PtpImgBackend),
}

impl ImageHost {
    pub fn name(&self) -> &'static str {
        match self {
            ImageHost::CheveretoV3(_) => "Chevereto v3",
            ImageHost::ImgBb(_) => "ImageBB",
            ImageHost::CheveretoV4(_) => "Chevereto v4",
            ImageHost::ImgBox(_) => "ImageBox",
            ImageHost::PtpImg(_) => "PTPIMG",
        }
    }

    /// Upload `filepaths`, returning one result per position.
    ///
    /// Per-item failures come back as failed results. Only configuration and
    /// authentication problems fail the whole call.
    pub async fn upload(
        &self,
        filepaths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
        options: &UploadOptions,
    ) -> AppResult<UploadResults> {
        match self {
            ImageHost::CheveretoV3(backend) => backend.upload(filepaths, progress, options).await,
            ImageHost::ImgBb(backend) => backend.upload(filepaths, progress, options).await,
            ImageHost::CheveretoV4(backend) => backend.upload(filepaths, progress, options).await,
            ImageHost::ImgBox(backend) => backend.upload(filepaths, progress, options).await,
            ImageHost::PtpImg(backend) => backend.upload(filepaths, progress, options).await,
        }
    }
}

impl From<CheveretoV3Backend> for ImageHost {
    fn from(backend: CheveretoV3Backend) -> Self {
        ImageHost::CheveretoV3(backend)
    }
}

impl From<ImgBbBackend> for ImageHost {
    fn from(backend: ImgBbBackend) -> Self {
        ImageHost::ImgBb(backend)
    }
}

impl From<CheveretoV4Backend> for ImageHost {
    fn from(backend: CheveretoV4Backend) -> Self {
        ImageHost::CheveretoV4(backend)
    }
}

impl From<ImgBoxBackend> for ImageHost {
    fn from(backend: ImgBoxBackend) -> Self {
        ImageHost::ImgBox(backend)
    }
}

impl From<PtpImgBackend> for ImageHost {
    fn from(backend: PtpImgBackend) -> Self {
        ImageHost::PtpImg(backend)
    }
}

/// Pull `url` and `medium.url` out of a Chevereto-shaped JSON body, which
/// nests them under either `image` or `data`.
pub(crate) fn parse_chevereto_image(body: &serde_json::Value) -> Option<UploadResult> {
    let image = body
        .get("image")
        .filter(|value| value.is_object())
        .or_else(|| body.get("data"))?;

    let url = image
        .get("url")
        .and_then(|v| v.as_str())
        .or_else(|| {
            image
                .get("image")
                .and_then(|inner| inner.get("url"))
                .and_then(|v| v.as_str())
        })
        .filter(|url| !url.is_empty())?;

    let medium = image
        .get("medium")
        .and_then(|m| m.get("url"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Some(UploadResult::success(url.to_string(), medium))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_result_has_no_urls() {
        let result = UploadResult::failed();
        assert!(!result.is_success());
        assert!(result.secondary_url.is_none());
    }

    #[test]
    fn empty_secondary_url_is_dropped() {
        let result = UploadResult::success("https://a/b.png".to_string(), Some(String::new()));
        assert!(result.is_success());
        assert!(result.secondary_url.is_none());
    }

    #[test]
    fn parses_image_shaped_response() {
        let body = json!({
            "image": {"url": "https://host/i/full.png", "medium": {"url": "https://host/i/md.png"}}
        });
        let result = parse_chevereto_image(&body).unwrap();
        assert_eq!(result.primary_url.as_deref(), Some("https://host/i/full.png"));
        assert_eq!(result.secondary_url.as_deref(), Some("https://host/i/md.png"));
    }

    #[test]
    fn parses_data_shaped_response() {
        let body = json!({"data": {"url": "https://host/full.jpg"}});
        let result = parse_chevereto_image(&body).unwrap();
        assert_eq!(result.primary_url.as_deref(), Some("https://host/full.jpg"));
        assert!(result.secondary_url.is_none());
    }

    #[test]
    fn parses_nested_image_url_under_data() {
        let body = json!({"data": {"image": {"url": "https://host/nested.png"}}});
        let result = parse_chevereto_image(&body).unwrap();
        assert_eq!(result.primary_url.as_deref(), Some("https://host/nested.png"));
    }

    #[test]
    fn missing_url_is_not_a_result() {
        assert!(parse_chevereto_image(&json!({"status_code": 200})).is_none());
        assert!(parse_chevereto_image(&json!({"image": {"url": ""}})).is_none());
    }
}
