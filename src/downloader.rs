use futures::future::join_all;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::sync::Semaphore;

use crate::errors::{AppError, AppResult};
use crate::uploader::client::{with_retry, ClientSettings, HostClient};
use crate::uploader::UploadResult;

/// Extensions recognised in a hosted URL, checked in this order.
pub const ACCEPTED_IMG_EXTS: [&str; 3] = [".png", ".jpg", ".jpeg"];

pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Receives the percentage of candidates that reached a terminal state.
pub type DownloadProgress = dyn Fn(f32) + Send + Sync;

/// One file to fetch, named after the position of its upload result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub filename: String,
    pub source_url: String,
}

/// Build download tasks from upload results.
///
/// `primary_url` is checked before `secondary_url`; results with no accepted
/// extension in either are skipped. Names are `dl_img_{position}{ext}` with
/// 1-based positions.
pub fn collect_download_tasks(url_data: &[UploadResult]) -> Vec<DownloadTask> {
    url_data
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            [item.primary_url.as_deref(), item.secondary_url.as_deref()]
                .into_iter()
                .flatten()
                .find_map(|url| {
                    let lower = url.to_lowercase();
                    ACCEPTED_IMG_EXTS
                        .iter()
                        .find(|ext| lower.contains(*ext))
                        .map(|ext| DownloadTask {
                            filename: format!("dl_img_{}{}", idx + 1, ext),
                            source_url: url.to_string(),
                        })
                })
        })
        .collect()
}

/// Fetches previously hosted images back into a local directory.
pub struct ImageDownloader {
    url_data: Vec<UploadResult>,
    output_dir: PathBuf,
    progress_cb: Option<Box<DownloadProgress>>,
    concurrency: usize,
    client: HostClient,
}

impl fmt::Debug for ImageDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDownloader")
            .field("items", &self.url_data.len())
            .field("output_dir", &self.output_dir)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl ImageDownloader {
    pub fn new(
        url_data: Vec<UploadResult>,
        output_dir: impl Into<PathBuf>,
        settings: &ClientSettings,
    ) -> AppResult<Self> {
        Ok(Self {
            url_data,
            output_dir: output_dir.into(),
            progress_cb: None,
            concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            client: HostClient::new(settings)?,
        })
    }

    pub fn with_progress<F>(mut self, progress_cb: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.progress_cb = Some(Box::new(progress_cb));
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download every recognisable image into a freshly emptied output
    /// directory, returning the written paths in result order.
    pub async fn download_images(&self) -> AppResult<Vec<PathBuf>> {
        self.prepare_output_dir().await?;

        let tasks = collect_download_tasks(&self.url_data);
        if tasks.is_empty() {
            return Err(AppError::NoDownloadableImages);
        }

        log::info!(
            "Downloading {} images to {}",
            tasks.len(),
            self.output_dir.display()
        );

        let semaphore = Semaphore::new(self.concurrency);
        let finished = AtomicUsize::new(0);
        let total = tasks.len();

        let downloads = tasks.iter().map(|task| {
            let semaphore = &semaphore;
            let finished = &finished;
            async move {
                let path = match self.download_one(task, semaphore).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::warn!("Dropping {}: {}", task.source_url, e);
                        None
                    }
                };

                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(cb) = &self.progress_cb {
                    cb(done as f32 / total as f32 * 100.0);
                }
                path
            }
        });

        let saved: Vec<PathBuf> = join_all(downloads).await.into_iter().flatten().collect();

        log::info!("Downloaded {}/{} images", saved.len(), total);

        if saved.is_empty() {
            return Err(AppError::DownloadsExhausted { attempted: total });
        }
        Ok(saved)
    }

    async fn prepare_output_dir(&self) -> AppResult<()> {
        if fs::try_exists(&self.output_dir).await? {
            fs::remove_dir_all(&self.output_dir).await?;
        }
        fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    /// A permit is held per attempt only, never across the backoff sleep.
    async fn download_one(&self, task: &DownloadTask, limiter: &Semaphore) -> AppResult<PathBuf> {
        let http = self.client.http();
        let bytes = with_retry(self.client.retry_config(), &task.source_url, move |_| async move {
            let _permit = limiter
                .acquire()
                .await
                .map_err(|e| AppError::Internal(format!("Download limiter closed: {}", e)))?;
            let response = http.get(&task.source_url).send().await?;
            let status = response.status();
            // Every non-success status earns another attempt here.
            if !status.is_success() {
                return Err(AppError::TransientHost {
                    status: status.as_u16(),
                    retry_after: None,
                });
            }
            Ok(response.bytes().await?)
        })
        .await?;

        let path = self.output_dir.join(&task.filename);
        fs::write(&path, &bytes).await?;
        log::debug!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
