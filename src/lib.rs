// Batched, concurrent image uploads to several image hosts, with combined
// progress reporting and a downloader for fetching hosted images back.

pub mod config;
pub mod downloader;
pub mod errors;
pub mod security;
pub mod uploader;

pub use downloader::ImageDownloader;
pub use errors::{AppError, AppResult};
pub use uploader::{ImageHost, ImageUploader, JobId, UploadOptions, UploadResult, UploadResults};
