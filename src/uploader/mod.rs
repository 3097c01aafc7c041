// Main uploader module - orchestrates all upload functionality
//
// Hosts live under `hosts`, the shared HTTP/retry plumbing in `client` and
// the concurrent job runner in `upload_queue`.

pub mod backend;
pub mod batch;
pub mod client;
pub mod hosts;
pub mod progress_tracker;
pub mod retry;
pub mod session;
pub mod upload_queue;

pub use backend::{ImageHost, ProgressCallback, UploadOptions, UploadResult, UploadResults};
pub use client::{ClientSettings, RetryConfig};
pub use progress_tracker::{ProgressCounters, ProgressRegistry, ProgressSnapshot};
pub use retry::retry_failed_uploads;
pub use upload_queue::{ImageUploader, JobId, JobOutcomes, ProgressSink};
