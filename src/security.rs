use reqwest::Url;
use std::path::Path;

use crate::errors::{AppError, AppResult};

/// Maximum accepted size for a single upload target.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub struct InputValidator;

impl InputValidator {
    /// Check that `path` is an existing, readable image file before any
    /// bytes are sent anywhere.
    pub fn validate_upload_target(path: &Path) -> AppResult<()> {
        let display = path.to_string_lossy();

        if display.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        match path.extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp") {
                    return Err(AppError::validation(
                        "file_path",
                        "Only image files can be uploaded",
                    ));
                }
            }
            None => {
                return Err(AppError::validation("file_path", "File must have an extension"));
            }
        }

        let metadata = std::fs::metadata(path).map_err(|_| AppError::file_not_found(&display))?;

        if !metadata.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        if metadata.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::validation("file_path", "File too large (max 50MB)"));
        }

        Ok(())
    }

    /// Host base URLs must be absolute http(s) URLs.
    pub fn validate_host_url(field: &str, url: &str) -> AppResult<()> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation(field, "URL cannot be empty"));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|e| AppError::validation(field, &format!("Invalid URL: {}", e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::validation(field, "URL must use http or https"));
        }

        Ok(())
    }

    /// Reject obviously absent credentials before any network call.
    pub fn require_credential<'a>(name: &str, value: Option<&'a str>) -> AppResult<&'a str> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(AppError::configuration(format!(
                "You are required to have {}",
                name
            ))),
        }
    }
}
